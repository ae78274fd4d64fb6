//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::UserConfig;
use crate::project::{
    AuditConfig, ConformanceConfig, DispatchConfig, LifetimeConfig, ProjectConfig, RuntimeConfig,
    UsageConfig,
};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the project configuration file
pub const CONFIG_FILE_NAME: &str = "gimarshal.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. User config (~/.gimarshal/config.toml) - lowest priority
/// 2. Project config (./gimarshal.toml) - overrides user
/// 3. Environment variables (GIMARSHAL_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached user config path
    user_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// User configuration
    pub user: UserConfig,

    /// Project root directory (where gimarshal.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            user_config_path: None,
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find gimarshal.toml, then loads the
    /// user config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let user_config = self.load_user_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            user: user_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let user_config = self.load_user_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            user: user_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load user configuration from ~/.gimarshal/config.toml
    fn load_user_config(&mut self) -> ConfigResult<UserConfig> {
        let path = match &self.user_config_path {
            Some(path) => path.clone(),
            None => {
                let path = UserConfig::user_config_path()?;
                self.user_config_path = Some(path.clone());
                path
            }
        };

        // User config is optional - if it doesn't exist, return default
        if !path.exists() {
            return Ok(UserConfig::default());
        }

        UserConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to project config
    ///
    /// Recognised variables: GIMARSHAL_DANGLING, GIMARSHAL_USAGE_POLICY,
    /// GIMARSHAL_AMBIGUOUS_OVERRIDE, GIMARSHAL_PARALLEL, GIMARSHAL_AUDIT.
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Some(dangling) = env_parse("GIMARSHAL_DANGLING")? {
            config
                .lifetime
                .get_or_insert_with(LifetimeConfig::default)
                .dangling = Some(dangling);
        }

        if let Some(policy) = env_parse("GIMARSHAL_USAGE_POLICY")? {
            config.usage.get_or_insert_with(UsageConfig::default).policy = Some(policy);
        }

        if let Some(resolution) = env_parse("GIMARSHAL_AMBIGUOUS_OVERRIDE")? {
            config
                .dispatch
                .get_or_insert_with(DispatchConfig::default)
                .ambiguous_override = Some(resolution);
        }

        if let Ok(parallel) = env::var("GIMARSHAL_PARALLEL") {
            config
                .conformance
                .get_or_insert_with(ConformanceConfig::default)
                .parallel = Some(parse_bool(&parallel));
        }

        if let Ok(audit) = env::var("GIMARSHAL_AUDIT") {
            config.audit.get_or_insert_with(AuditConfig::default).enabled =
                Some(parse_bool(&audit));
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn env_parse<T: FromStr<Err = String>>(var: &str) -> ConfigResult<Option<T>> {
    match env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|reason| ConfigError::InvalidValue {
                field: var.to_string(),
                reason,
            }),
        Err(_) => Ok(None),
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Resolved runtime settings
    pub fn runtime(&self) -> RuntimeConfig {
        self.project.resolve()
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if a gimarshal.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{DanglingWindow, OverrideResolution, UsagePolicy};
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[usage]\npolicy = \"panic\"\n");

        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let mut loader = ConfigLoader::new();
        let config = loader.load_from_directory(&sub_dir).unwrap();

        assert_eq!(config.runtime().usage_policy, UsagePolicy::Panic);
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_env_override_dangling() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[lifetime]\ndangling = \"next-call\"\n");

        env::set_var("GIMARSHAL_DANGLING", "owner-destroyed");

        let mut loader = ConfigLoader::new();
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        env::remove_var("GIMARSHAL_DANGLING");

        assert_eq!(config.runtime().dangling, DanglingWindow::OwnerDestroyed);
    }

    #[test]
    #[serial]
    fn test_env_override_ambiguous_override() {
        let temp_dir = TempDir::new().unwrap();
        env::set_var("GIMARSHAL_AMBIGUOUS_OVERRIDE", "last-wins");

        let mut loader = ConfigLoader::new();
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        env::remove_var("GIMARSHAL_AMBIGUOUS_OVERRIDE");

        assert_eq!(config.runtime().ambiguous_override, OverrideResolution::LastWins);
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_value() {
        let temp_dir = TempDir::new().unwrap();
        env::set_var("GIMARSHAL_USAGE_POLICY", "ignore");

        let mut loader = ConfigLoader::new();
        let result = loader.load_from_directory(temp_dir.path());

        env::remove_var("GIMARSHAL_USAGE_POLICY");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("YES"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("off"));
    }
}
