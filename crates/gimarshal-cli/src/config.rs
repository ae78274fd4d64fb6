//! CLI configuration via environment variables
//!
//! Settings that shape terminal output only. Runtime settings come from
//! `gimarshal.toml` through `gimarshal-config`.

use std::env;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Default to JSON output (GIMARSHAL_JSON=1)
    pub default_json: bool,
    /// Disable colored output (GIMARSHAL_NO_COLOR=1 or NO_COLOR=1)
    pub no_color: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            default_json: env::var("GIMARSHAL_JSON")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "json"))
                .unwrap_or(false),
            no_color: env::var("GIMARSHAL_NO_COLOR").is_ok() || env::var("NO_COLOR").is_ok(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_defaults() {
        env::remove_var("GIMARSHAL_JSON");
        env::remove_var("GIMARSHAL_NO_COLOR");
        env::remove_var("NO_COLOR");

        let config = Config::from_env();
        assert!(!config.default_json);
        assert!(!config.no_color);
    }

    #[test]
    #[serial]
    fn test_config_json_values() {
        env::set_var("GIMARSHAL_JSON", "json");
        assert!(Config::from_env().default_json);
        env::set_var("GIMARSHAL_JSON", "0");
        assert!(!Config::from_env().default_json);
        env::remove_var("GIMARSHAL_JSON");
    }
}
