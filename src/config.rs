//! Configuration loading and management
//!
//! Handles parsing of the optional `.wipman.toml` file at the root.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::storage::CONFIG_FILE;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Extension of view files under `views/`
    #[serde(default = "default_view_extension")]
    pub view_extension: String,

    /// Glob patterns, relative to the root, that on-save handling ignores
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,

    /// Write an index snapshot to `.snapshots/` after every save
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            view_extension: default_view_extension(),
            ignore: default_ignore(),
            debug: false,
            watch: WatchConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

fn default_view_extension() -> String {
    "view".to_string()
}

fn default_ignore() -> Vec<String> {
    vec!["*.json".to_string(), ".vscode/**".to_string()]
}

/// Watch-mode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Quiet period before a burst of filesystem events is handled
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    200
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Remote-sync buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Record file changes for the next `wipman sync`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Buffer file name, relative to the root
    #[serde(default = "default_buffer_file")]
    pub buffer_file: String,
}

fn default_true() -> bool {
    true
}

fn default_buffer_file() -> String {
    ".changes_to_sync".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            buffer_file: default_buffer_file(),
        }
    }
}

fn validate_pattern(pattern: &str, field: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(Error::InvalidConfig(format!(
            "{field}: pattern cannot be empty"
        )));
    }
    glob::Pattern::new(pattern).map_err(|err| {
        Error::InvalidConfig(format!("{field}: invalid glob pattern '{pattern}': {err}"))
    })?;
    Ok(())
}

impl Config {
    /// Load configuration from a `.wipman.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a root, or return defaults
    pub fn load_from_root(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether a root-relative path matches one of the `ignore` globs.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        self.ignore.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|compiled| compiled.matches_path(relative))
                .unwrap_or(false)
        })
    }

    fn validate(&self) -> Result<()> {
        let extension = self.view_extension.trim();
        if extension.is_empty() {
            return Err(Error::InvalidConfig(
                "view_extension cannot be empty".to_string(),
            ));
        }
        if !extension.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(Error::InvalidConfig(
                "view_extension must be alphanumeric".to_string(),
            ));
        }
        for pattern in &self.ignore {
            validate_pattern(pattern, "ignore")?;
        }
        if self.sync.buffer_file.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "sync.buffer_file cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert_eq!(cfg.view_extension, "view");
        assert_eq!(cfg.ignore, vec!["*.json".to_string(), ".vscode/**".to_string()]);
        assert!(!cfg.debug);
        assert_eq!(cfg.watch.debounce_ms, 200);
        assert!(cfg.sync.enabled);
        assert_eq!(cfg.sync.buffer_file, ".changes_to_sync");
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
view_extension = "md"
ignore = ["notes/**"]
debug = true

[watch]
debounce_ms = 50

[sync]
enabled = false
buffer_file = ".pending"
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.view_extension, "md");
        assert_eq!(cfg.ignore, vec!["notes/**".to_string()]);
        assert!(cfg.debug);
        assert_eq!(cfg.watch.debounce_ms, 50);
        assert!(!cfg.sync.enabled);
        assert_eq!(cfg.sync.buffer_file, ".pending");
    }

    #[test]
    fn invalid_glob_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "ignore = [\"[\"]").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_toml_is_invalid_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "debug = ").expect("write config");

        assert!(matches!(
            Config::load(&path),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn load_from_root_defaults_when_missing_or_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(Config::load_from_root(dir.path()), Config::default());

        fs::write(dir.path().join(CONFIG_FILE), "view_extension = \"\"").expect("write");
        assert_eq!(Config::load_from_root(dir.path()), Config::default());
    }

    #[test]
    fn ignore_globs_match_relative_paths() {
        let cfg = Config::default();
        assert!(cfg.is_ignored(Path::new("settings.json")));
        assert!(cfg.is_ignored(Path::new(".vscode/settings")));
        assert!(cfg.is_ignored(Path::new("ab/data.json")));
        assert!(!cfg.is_ignored(Path::new("ab/cdefghij")));
        assert!(!cfg.is_ignored(Path::new("views/backlog.view")));
    }

    #[test]
    fn save_writes_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        Config::default().save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("view_extension = \"view\""));
        assert!(written.contains("[watch]"));
    }
}
