//! Persisted settings storage.
//!
//! The settings document is a JSON object that always carries a schema
//! version marker. Reads never fail: unreadable or corrupt storage is
//! treated as "no settings", a default document is synthesized and a
//! best-effort write restores the file.

use ptyhub_core::settings::{default_document, SCHEMA_VERSION_KEY, SCHEMA_VERSION};
use ptyhub_core::{merge_documents, PtyHubError, PtyHubResult, SettingsDocument};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Key/value settings storage with recursive-merge updates.
pub trait ConfigStore: Send + Sync {
    /// The current document, or a freshly synthesized default.
    fn get(&self) -> SettingsDocument;

    /// Merge `partial` into the stored document. Returns whether the result
    /// was persisted.
    fn merge(&self, partial: SettingsDocument) -> bool;
}

/// Settings persisted as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> PtyHubResult<SettingsDocument> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            PtyHubError::ConfigIo(format!("cannot read {}: {e}", self.path.display()))
        })?;
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(PtyHubError::ConfigIo(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
        }
    }

    fn save(&self, doc: &SettingsDocument) -> PtyHubResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PtyHubError::ConfigIo(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        std::fs::write(&self.path, json).map_err(|e| {
            PtyHubError::ConfigIo(format!("cannot write {}: {e}", self.path.display()))
        })
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self) -> SettingsDocument {
        match self.load() {
            Ok(doc) => doc,
            Err(e) => {
                info!(
                    path = %self.path.display(),
                    error = %e,
                    "no usable settings, writing defaults"
                );
                let doc = default_document();
                if let Err(e) = self.save(&doc) {
                    warn!(error = %e, "failed to write default settings");
                }
                doc
            }
        }
    }

    fn merge(&self, partial: SettingsDocument) -> bool {
        let mut doc = self.load().unwrap_or_else(|e| {
            debug!(error = %e, "merging into default settings");
            default_document()
        });
        merge_documents(&mut doc, partial);
        ensure_version(&mut doc);
        match self.save(&doc) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to persist settings");
                false
            }
        }
    }
}

/// Settings held in memory only.
#[derive(Debug)]
pub struct MemoryStore {
    doc: RwLock<SettingsDocument>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(default_document())
    }
}

impl MemoryStore {
    pub fn new(mut doc: SettingsDocument) -> Self {
        ensure_version(&mut doc);
        Self {
            doc: RwLock::new(doc),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self) -> SettingsDocument {
        self.doc
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn merge(&self, partial: SettingsDocument) -> bool {
        let mut doc = self.doc.write().unwrap_or_else(PoisonError::into_inner);
        merge_documents(&mut doc, partial);
        ensure_version(&mut doc);
        true
    }
}

fn ensure_version(doc: &mut SettingsDocument) {
    doc.entry(SCHEMA_VERSION_KEY)
        .or_insert_with(|| Value::from(SCHEMA_VERSION));
}
