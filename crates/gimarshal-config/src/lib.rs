//! Configuration for the marshalling contract model
//!
//! Provides configuration management for conformance runs including:
//! - Project configuration (gimarshal.toml)
//! - User configuration (~/.gimarshal/config.toml)
//! - Configuration precedence and merging
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. User config (~/.gimarshal/config.toml)
//! 2. Project config (./gimarshal.toml)
//! 3. Environment variables (GIMARSHAL_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use gimarshal_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! let runtime = config.runtime();
//! ```

pub mod global;
pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use global::UserConfig;
pub use loader::{Config, ConfigLoader, CONFIG_FILE_NAME};
pub use project::{
    DanglingWindow, OverrideResolution, ProjectConfig, RuntimeConfig, UsagePolicy,
};
