//! Launcher Configuration
//!
//! Small JSON-backed configuration for the session binary. Every field
//! has a default, so a partial file (or none at all) is fine.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::DEFAULT_PORT;

/// Settings the launcher reads at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Port to host on, or to dial when joining.
    pub port: u16,
    /// Host address to dial when joining.
    pub host_addr: String,
    /// Local nickname; the identity provider's answer wins when absent.
    pub nickname: Option<String>,
    /// Loadout picked at launch.
    pub loadout: Option<String>,
    /// Process-wide fallback loadout for participants who never pick.
    pub default_loadout: Option<String>,
    /// Scene the host announces after the lobby fills.
    pub map: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host_addr: "127.0.0.1".to_string(),
            nickname: None,
            loadout: None,
            default_loadout: Some("trainer".to_string()),
            map: "proving_grounds".to_string(),
        }
    }
}

impl LaunchConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` when given; a missing or broken file logs a
    /// warning and falls back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(path) => match Self::load(path) {
                Ok(config) => {
                    info!(path = %path.display(), "configuration loaded");
                    config
                }
                Err(error) => {
                    warn!(error = %error, "could not load configuration; using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LaunchConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host_addr, "127.0.0.1");
        assert!(config.nickname.is_none());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: LaunchConfig =
            serde_json::from_str(r#"{"nickname": "Alice", "port": 9000}"#).unwrap();
        assert_eq!(config.nickname.as_deref(), Some("Alice"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.map, "proving_grounds");
    }

    #[test]
    fn test_roundtrip() {
        let config = LaunchConfig {
            nickname: Some("Bob".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: LaunchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.nickname.as_deref(), Some("Bob"));
        assert_eq!(parsed.port, config.port);
    }

    #[test]
    fn test_missing_file_reports_error() {
        let err = LaunchConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
