use serde::{Deserialize, Serialize};

/// Read-only view of a session, exported to callers such as a UI.
///
/// `pid` appears once the process has started, `exit_code` once it has
/// exited, and `title` only when it contains something other than
/// whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub is_started: bool,
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Phonetic rendering of the id's first characters.
    pub label: String,
}

impl SessionSummary {
    /// Normalise a raw title for export: blank titles are omitted.
    pub fn export_title(title: &str) -> Option<String> {
        if title.trim().is_empty() {
            None
        } else {
            Some(title.to_string())
        }
    }
}
