//! Engine configuration: TOML file + CLI overrides.

use crate::session::SessionOptions;
use ptyhub_core::{PtyHubError, PtyHubResult, TitleScanner};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "~/.ptyhub/config.toml";

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub settings: SettingsSection,
}

/// `[engine]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_capacity")]
    pub output_capacity: usize,
    #[serde(default = "default_capacity")]
    pub input_capacity: usize,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_true")]
    pub optimize_clears: bool,
    #[serde(default = "default_title_openers")]
    pub title_openers: Vec<String>,
    #[serde(default = "default_pump_interval_ms")]
    pub pump_interval_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            output_capacity: default_capacity(),
            input_capacity: default_capacity(),
            rows: default_rows(),
            cols: default_cols(),
            optimize_clears: true,
            title_openers: default_title_openers(),
            pump_interval_ms: default_pump_interval_ms(),
        }
    }
}

/// `[settings]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsSection {
    #[serde(default = "default_settings_path")]
    pub path: String,
    #[serde(default = "default_shells_file")]
    pub shells_file: String,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            path: default_settings_path(),
            shells_file: default_shells_file(),
        }
    }
}

fn default_capacity() -> usize {
    crate::session::terminal::DEFAULT_BUFFER_CAPACITY
}
fn default_rows() -> u16 {
    24
}
fn default_cols() -> u16 {
    80
}
fn default_true() -> bool {
    true
}
fn default_title_openers() -> Vec<String> {
    vec!["\u{1b}]".to_string(), "!]".to_string()]
}
fn default_pump_interval_ms() -> u64 {
    10
}
fn default_settings_path() -> String {
    "~/.ptyhub/settings.json".to_string()
}
fn default_shells_file() -> String {
    "/etc/shells".to_string()
}

/// Values given on the command line, taking precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub rows: Option<u16>,
    pub cols: Option<u16>,
    pub settings_path: Option<PathBuf>,
}

/// Resolved engine configuration (paths expanded, overrides applied).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub session: SessionOptions,
    pub settings_path: PathBuf,
    pub shells_file: PathBuf,
}

impl EngineConfig {
    /// Load config from a TOML file, then apply overrides.
    ///
    /// A missing file means defaults; a file that does not parse or holds
    /// invalid values is an error.
    pub fn load(config_path: Option<&Path>, overrides: &ConfigOverrides) -> PtyHubResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded).map_err(|e| {
                        PtyHubError::ConfigIo(format!("cannot read {}: {e}", expanded.display()))
                    })?;
                    Self::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, overrides)
    }

    fn parse(content: &str) -> PtyHubResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| PtyHubError::InvalidConfig(format!("config parse error: {e}")))
    }

    fn resolve(file: ConfigFile, overrides: &ConfigOverrides) -> PtyHubResult<Self> {
        let engine = file.engine;
        let rows = overrides.rows.unwrap_or(engine.rows);
        let cols = overrides.cols.unwrap_or(engine.cols);

        if engine.output_capacity == 0 || engine.input_capacity == 0 {
            return Err(PtyHubError::InvalidConfig(
                "buffer capacities must be non-zero".into(),
            ));
        }
        if rows == 0 || cols == 0 {
            return Err(PtyHubError::InvalidConfig(format!(
                "invalid terminal size {rows}x{cols}"
            )));
        }
        if engine.title_openers.iter().any(String::is_empty) {
            return Err(PtyHubError::InvalidConfig("title openers must be non-empty".into()));
        }

        let openers = engine
            .title_openers
            .into_iter()
            .map(String::into_bytes)
            .collect();

        Ok(Self {
            session: SessionOptions {
                output_capacity: engine.output_capacity,
                input_capacity: engine.input_capacity,
                rows,
                cols,
                optimize_clears: engine.optimize_clears,
                title_scanner: TitleScanner::new(openers),
                pump_interval: Duration::from_millis(engine.pump_interval_ms),
            },
            settings_path: overrides
                .settings_path
                .clone()
                .unwrap_or_else(|| expand_tilde_str(&file.settings.path)),
            shells_file: expand_tilde_str(&file.settings.shells_file),
        })
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = EngineConfig::load(Some(&path), &ConfigOverrides::default()).unwrap();

        assert_eq!(config.session.output_capacity, 38_400);
        assert_eq!(config.session.input_capacity, 38_400);
        assert_eq!((config.session.rows, config.session.cols), (24, 80));
        assert!(config.session.optimize_clears);
        assert_eq!(config.session.pump_interval, Duration::from_millis(10));
        assert_eq!(config.session.title_scanner.openers().len(), 2);
        assert_eq!(config.shells_file, PathBuf::from("/etc/shells"));
        assert!(config.settings_path.ends_with(".ptyhub/settings.json"));
    }

    #[test]
    fn file_values_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[engine]
output_capacity = 1024
rows = 50
optimize_clears = false
title_openers = ["\u001b]"]

[settings]
shells_file = "/tmp/shells"
"#,
        )
        .unwrap();

        let overrides = ConfigOverrides {
            cols: Some(132),
            settings_path: Some(PathBuf::from("/tmp/s.json")),
            ..ConfigOverrides::default()
        };
        let config = EngineConfig::load(Some(&path), &overrides).unwrap();

        assert_eq!(config.session.output_capacity, 1024);
        assert_eq!(config.session.input_capacity, 38_400);
        assert_eq!((config.session.rows, config.session.cols), (50, 132));
        assert!(!config.session.optimize_clears);
        assert_eq!(config.session.title_scanner.openers(), &[b"\x1b]".to_vec()]);
        assert_eq!(config.shells_file, PathBuf::from("/tmp/shells"));
        assert_eq!(config.settings_path, PathBuf::from("/tmp/s.json"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for content in [
            "[engine]\noutput_capacity = 0",
            "[engine]\nrows = 0",
            "[engine]\ntitle_openers = [\"\"]",
            "[engine\nbroken",
        ] {
            let result = EngineConfig::parse(content)
                .and_then(|file| EngineConfig::resolve(file, &ConfigOverrides::default()));
            assert!(
                matches!(result, Err(PtyHubError::InvalidConfig(_))),
                "accepted: {content}"
            );
        }
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_tilde_str("~/x/y");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("x/y"));
        }
        assert_eq!(expand_tilde_str("/abs"), PathBuf::from("/abs"));
    }
}
