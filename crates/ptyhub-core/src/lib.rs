//! ptyhub-core: shared library for the ptyhub terminal session engine.
//!
//! Provides the error taxonomy, the control-sequence scanner (window titles
//! and clear-screen detection), session summaries, the persisted settings
//! document and the phonetic mnemonic helper. Nothing here performs I/O.

pub mod error;
pub mod phonetic;
pub mod scanner;
pub mod settings;
pub mod summary;

// Re-export commonly used items at crate root.
pub use error::{PtyHubError, PtyHubResult};
pub use phonetic::{mnemonic, phoneticize};
pub use scanner::{last_clear_offset, TitleScanner, CLEAR_SEQUENCES};
pub use settings::{merge_documents, SettingsDocument, TerminalFlags, SCHEMA_VERSION};
pub use summary::SessionSummary;
