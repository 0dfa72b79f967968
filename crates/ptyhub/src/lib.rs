//! ptyhub: terminal session engine.
//!
//! Spawns and multiplexes interactive commands on pseudo-terminals. Each
//! session keeps bounded scrollback, tracks the window title, drops
//! scrollback on clear-screen and forwards live output to an [`OutputSink`]
//! while subscribed. [`SessionRegistry`] is the control surface.

pub mod config;
pub mod session;
pub mod shells;
pub mod sink;
pub mod store;

pub use config::{ConfigOverrides, EngineConfig};
pub use session::{CreateRequest, SessionOptions, SessionRegistry, SessionState};
pub use shells::{EtcShells, ShellLister, StaticShells};
pub use sink::{ChannelSink, NullSink, OutputEvent, OutputSink};
pub use store::{ConfigStore, JsonFileStore, MemoryStore};
