//! Terminal sessions: PTY process, scrollback, pumps and the registry.

pub mod pty;
pub mod registry;
pub mod ring_buffer;
pub mod terminal;

pub use pty::{EnvOverrides, PtyProcess};
pub use registry::{CreateRequest, SessionRegistry};
pub use ring_buffer::RingBuffer;
pub use terminal::{SessionOptions, SessionState, TerminalSession};
