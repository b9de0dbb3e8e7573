//! Runtime configuration.
//!
//! Loaded from a TOML file when one exists, with per-field defaults so a
//! partial file (or none at all) still yields a working configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Server and capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shell spawned in each session's PTY
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Directory for persisted conversation files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Quiet seconds after which a streaming response counts as finished
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Hard cap on stored screen snapshots per conversation
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    /// How many recent snapshots survive a cap overflow
    #[serde(default = "default_snapshot_keep_recent")]
    pub snapshot_keep_recent: usize,

    /// Whether sessions start with auto-respond (low-confidence alerting) on
    #[serde(default)]
    pub auto_respond: bool,

    /// Whether sessions start with vision pattern detection on
    #[serde(default)]
    pub vision_enabled: bool,

    /// Hard ceiling on session lifetime, in hours
    #[serde(default = "default_session_ceiling_hours")]
    pub session_ceiling_hours: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shell: default_shell(),
            data_dir: default_data_dir(),
            response_timeout_secs: default_response_timeout_secs(),
            max_snapshots: default_max_snapshots(),
            snapshot_keep_recent: default_snapshot_keep_recent(),
            auto_respond: false,
            vision_enabled: false,
            session_ceiling_hours: default_session_ceiling_hours(),
        }
    }
}

impl Config {
    /// Load from an explicit path, or from the default location when `path`
    /// is `None`. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// Default config file location: `~/.config/ttyscribe/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ttyscribe")
        .join("config.toml")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8776
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ttyscribe")
        .join("conversations")
}

fn default_response_timeout_secs() -> u64 {
    3
}

fn default_max_snapshots() -> usize {
    50
}

fn default_snapshot_keep_recent() -> usize {
    25
}

fn default_session_ceiling_hours() -> u64 {
    24
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.port, 8776);
        assert_eq!(config.response_timeout_secs, 3);
        assert_eq!(config.max_snapshots, 50);
        assert!(!config.auto_respond);
    }

    #[test]
    fn partial_file_keeps_defaults_for_omitted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 9001\nauto_respond = true\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.port, 9001);
        assert!(config.auto_respond);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.session_ceiling_hours, 24);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
