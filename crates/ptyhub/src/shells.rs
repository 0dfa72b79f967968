//! Discovery of the shells available on the host.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Shell used when nothing better is known.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Supplies candidate shells, most preferred first.
pub trait ShellLister: Send + Sync {
    fn list(&self) -> Vec<String>;
}

/// Reads the system's valid-shells file (`/etc/shells` on POSIX).
#[derive(Debug, Clone)]
pub struct EtcShells {
    path: PathBuf,
}

impl Default for EtcShells {
    fn default() -> Self {
        Self::new("/etc/shells")
    }
}

impl EtcShells {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ShellLister for EtcShells {
    #[cfg(unix)]
    fn list(&self) -> Vec<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let shells = parse_shells(&content);
                if shells.is_empty() {
                    vec![FALLBACK_SHELL.to_string()]
                } else {
                    shells
                }
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "cannot read shells file");
                vec![FALLBACK_SHELL.to_string()]
            }
        }
    }

    #[cfg(not(unix))]
    fn list(&self) -> Vec<String> {
        vec!["powershell".to_string(), "cmd".to_string()]
    }
}

/// A fixed list of shells.
#[derive(Debug, Clone, Default)]
pub struct StaticShells(pub Vec<String>);

impl ShellLister for StaticShells {
    fn list(&self) -> Vec<String> {
        if self.0.is_empty() {
            vec![FALLBACK_SHELL.to_string()]
        } else {
            self.0.clone()
        }
    }
}

/// Absolute paths from a shells file, in file order. Comments and blank
/// lines are skipped.
pub fn parse_shells(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('/'))
        .map(str::to_string)
        .collect()
}
