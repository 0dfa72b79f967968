//! Persisted settings document and the typed views derived from it.
//!
//! Settings are stored as a flat JSON object that always carries a schema
//! version marker. Partial updates are applied with a recursive merge.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A settings document: a JSON object keyed by string.
pub type SettingsDocument = Map<String, Value>;

/// Key holding the schema version marker.
pub const SCHEMA_VERSION_KEY: &str = "__version__";

/// Current schema version.
pub const SCHEMA_VERSION: u64 = 1;

/// Key holding the preferred shell path.
pub const DEFAULT_SHELL_KEY: &str = "default_shell";

/// Key holding the `use_display` terminal flag.
pub const USE_DISPLAY_KEY: &str = "use_display";

/// A fresh document containing only the schema version marker.
pub fn default_document() -> SettingsDocument {
    let mut doc = Map::new();
    doc.insert(SCHEMA_VERSION_KEY.to_string(), Value::from(SCHEMA_VERSION));
    doc
}

/// Merge `partial` into `base`.
///
/// Keys missing from `base` are inserted. When both sides hold an object the
/// merge recurses; otherwise the incoming value replaces the existing one.
pub fn merge_documents(base: &mut SettingsDocument, partial: SettingsDocument) {
    for (key, value) in partial {
        match base.get_mut(&key) {
            Some(Value::Object(existing)) if value.is_object() => {
                if let Value::Object(incoming) = value {
                    merge_documents(existing, incoming);
                }
            }
            _ => {
                base.insert(key, value);
            }
        }
    }
}

/// The configured default shell, if set to a non-blank string.
pub fn default_shell(doc: &SettingsDocument) -> Option<String> {
    doc.get(DEFAULT_SHELL_KEY)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Flags that shape the environment of a spawned process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalFlags {
    /// Export `DISPLAY=:0` so graphical programs can reach the local display.
    #[serde(default)]
    pub use_display: bool,
}

impl TerminalFlags {
    /// Read flags from a settings document. Values of the wrong type are
    /// ignored and the flag keeps its default.
    pub fn from_document(doc: &SettingsDocument) -> Self {
        let use_display = doc
            .get(USE_DISPLAY_KEY)
            .and_then(Value::as_bool)
            .unwrap_or_default();
        Self { use_display }
    }
}
