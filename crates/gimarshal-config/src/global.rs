//! User Configuration (~/.gimarshal/config.toml)
//!
//! Handles user-level preferences stored in `~/.gimarshal/config.toml`.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User configuration from ~/.gimarshal/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    /// Output preferences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
}

/// Output preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Colorize terminal output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<bool>,

    /// Print every case instead of a dot per case
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

impl UserConfig {
    /// Load user configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })
    }

    /// Path of the user configuration file
    pub fn user_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".gimarshal").join("config.toml"))
    }

    /// Whether colored output is wanted (default: true)
    pub fn color(&self) -> bool {
        self.output.as_ref().and_then(|o| o.color).unwrap_or(true)
    }

    /// Whether verbose output is wanted (default: false)
    pub fn verbose(&self) -> bool {
        self.output.as_ref().and_then(|o| o.verbose).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = UserConfig::default();
        assert!(config.color());
        assert!(!config.verbose());
    }

    #[test]
    fn test_load_user_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[output]\ncolor = false\nverbose = true\n").unwrap();

        let config = UserConfig::load_from_file(&path).unwrap();
        assert!(!config.color());
        assert!(config.verbose());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = UserConfig::load_from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
