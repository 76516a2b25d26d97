//! CLI settings

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use board_link::SupervisorConfig;
use board_protocol::Protocol;
use serde::{Deserialize, Serialize};

/// A serial port the user always wants supervised
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfiguredBoard {
    /// Serial port path
    pub port: String,
    /// Protocol spoken on the port
    pub protocol: Protocol,
    /// Display name, defaults to the port
    #[serde(default)]
    pub name: Option<String>,
}

/// Saved settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Protocol used when a command does not name one
    pub default_protocol: Protocol,
    /// Boards queued by `run` before any from the command line
    #[serde(default)]
    pub boards: Vec<ConfiguredBoard>,
    /// Watch for hotplugged boards in `run`
    #[serde(default)]
    pub watch: bool,
    /// Supervisor timers and board wiring
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_protocol: Protocol::Firmata,
            boards: Vec::new(),
            watch: false,
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl Settings {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("boardlink"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("boardlink"))
    }

    /// Settings file, or the override when one is given
    pub fn settings_path(override_path: Option<&Path>) -> Option<PathBuf> {
        match override_path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::config_dir().map(|p| p.join("settings.json")),
        }
    }

    /// Load settings, falling back to defaults if the file is missing
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("boardlink-test-{}-{}", std::process::id(), name))
            .join("settings.json")
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = scratch_path("missing");
        assert_eq!(Settings::load(Some(&path)).unwrap(), Settings::default());
        assert_eq!(Settings::load(None).unwrap(), Settings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let path = scratch_path("roundtrip");
        let mut settings = Settings {
            default_protocol: Protocol::Telegram,
            watch: true,
            ..Settings::default()
        };
        settings.boards.push(ConfiguredBoard {
            port: "/dev/ttyACM0".to_string(),
            protocol: Protocol::Firmata,
            name: Some("Uno".to_string()),
        });
        settings.supervisor.firmata.max_missed_pings = 10;

        settings.save(&path).unwrap();
        let loaded = Settings::load(Some(&path)).unwrap();
        assert_eq!(loaded, settings);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"default_protocol":"telegram"}"#).unwrap();
        assert_eq!(settings.default_protocol, Protocol::Telegram);
        assert!(settings.boards.is_empty());
        assert_eq!(settings.supervisor, SupervisorConfig::default());
    }

    #[test]
    fn test_override_path_wins() {
        let path = PathBuf::from("/tmp/custom.json");
        assert_eq!(Settings::settings_path(Some(&path)), Some(path));
    }
}
