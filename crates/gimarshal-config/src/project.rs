//! Project Configuration (gimarshal.toml)
//!
//! Handles project-level configuration stored in `gimarshal.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How long a transfer-none out value documented as dangling stays readable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DanglingWindow {
    /// Valid only until the next boundary call of any kind
    #[default]
    NextCall,
    /// Valid until the owning object is destroyed (the looser reading)
    OwnerDestroyed,
}

/// What the boundary does when the caller breaks the ownership contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UsagePolicy {
    /// Panic at the violation site
    Panic,
    /// Return the violation as an error
    #[default]
    Propagate,
}

/// Resolution of an unqualified override that matches methods of two interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideResolution {
    /// Refuse to build the class
    #[default]
    Error,
    /// Bind to the interface declared last
    LastWins,
}

impl FromStr for DanglingWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "next-call" | "next_call" => Ok(DanglingWindow::NextCall),
            "owner-destroyed" | "owner_destroyed" => Ok(DanglingWindow::OwnerDestroyed),
            other => Err(format!(
                "expected 'next-call' or 'owner-destroyed', got '{}'",
                other
            )),
        }
    }
}

impl FromStr for UsagePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "panic" => Ok(UsagePolicy::Panic),
            "propagate" => Ok(UsagePolicy::Propagate),
            other => Err(format!("expected 'panic' or 'propagate', got '{}'", other)),
        }
    }
}

impl FromStr for OverrideResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(OverrideResolution::Error),
            "last-wins" | "last_wins" => Ok(OverrideResolution::LastWins),
            other => Err(format!("expected 'error' or 'last-wins', got '{}'", other)),
        }
    }
}

impl fmt::Display for DanglingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DanglingWindow::NextCall => write!(f, "next-call"),
            DanglingWindow::OwnerDestroyed => write!(f, "owner-destroyed"),
        }
    }
}

/// Project configuration from gimarshal.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Borrowed-value lifetime rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<LifetimeConfig>,

    /// Contract violation handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageConfig>,

    /// Virtual/interface dispatch rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchConfig>,

    /// Conformance driver settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conformance: Option<ConformanceConfig>,

    /// Audit log settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditConfig>,
}

/// Borrowed-value lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LifetimeConfig {
    /// Invalidation window for dangling out values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dangling: Option<DanglingWindow>,
}

/// Usage violation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct UsageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<UsagePolicy>,
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    #[serde(rename = "ambiguous-override")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambiguous_override: Option<OverrideResolution>,
}

/// Conformance driver configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConformanceConfig {
    /// Run cases on a thread pool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,

    /// Only run cases whose name contains this substring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Upper bound on retained entries per boundary
    #[serde(rename = "max-entries")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
}

/// Fully resolved settings consumed by the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub dangling: DanglingWindow,
    pub usage_policy: UsagePolicy,
    pub ambiguous_override: OverrideResolution,
    pub parallel: bool,
    pub filter: Option<String>,
    pub audit_enabled: bool,
    pub audit_max_entries: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dangling: DanglingWindow::NextCall,
            usage_policy: UsagePolicy::Propagate,
            ambiguous_override: OverrideResolution::Error,
            parallel: true,
            filter: None,
            audit_enabled: true,
            audit_max_entries: None,
        }
    }
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse project configuration from a TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: "<string>".into(),
            error: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(filter) = self.conformance.as_ref().and_then(|c| c.filter.as_ref()) {
            if filter.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "conformance.filter".to_string(),
                    reason: "filter must not be empty".to_string(),
                });
            }
        }

        if let Some(0) = self.audit.as_ref().and_then(|a| a.max_entries) {
            return Err(ConfigError::InvalidValue {
                field: "audit.max-entries".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Resolve into runtime settings, filling gaps with defaults
    pub fn resolve(&self) -> RuntimeConfig {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            dangling: self
                .lifetime
                .as_ref()
                .and_then(|l| l.dangling)
                .unwrap_or(defaults.dangling),
            usage_policy: self
                .usage
                .as_ref()
                .and_then(|u| u.policy)
                .unwrap_or(defaults.usage_policy),
            ambiguous_override: self
                .dispatch
                .as_ref()
                .and_then(|d| d.ambiguous_override)
                .unwrap_or(defaults.ambiguous_override),
            parallel: self
                .conformance
                .as_ref()
                .and_then(|c| c.parallel)
                .unwrap_or(defaults.parallel),
            filter: self.conformance.as_ref().and_then(|c| c.filter.clone()),
            audit_enabled: self
                .audit
                .as_ref()
                .and_then(|a| a.enabled)
                .unwrap_or(defaults.audit_enabled),
            audit_max_entries: self.audit.as_ref().and_then(|a| a.max_entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = ProjectConfig::parse(
            r#"
[lifetime]
dangling = "owner-destroyed"

[usage]
policy = "panic"

[dispatch]
ambiguous-override = "last-wins"

[conformance]
parallel = false
filter = "array"

[audit]
enabled = false
max-entries = 128
"#,
        )
        .unwrap();

        let runtime = config.resolve();
        assert_eq!(runtime.dangling, DanglingWindow::OwnerDestroyed);
        assert_eq!(runtime.usage_policy, UsagePolicy::Panic);
        assert_eq!(runtime.ambiguous_override, OverrideResolution::LastWins);
        assert!(!runtime.parallel);
        assert_eq!(runtime.filter.as_deref(), Some("array"));
        assert!(!runtime.audit_enabled);
        assert_eq!(runtime.audit_max_entries, Some(128));
    }

    #[test]
    fn test_empty_config_resolves_to_defaults() {
        let config = ProjectConfig::parse("").unwrap();
        assert_eq!(config.resolve(), RuntimeConfig::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = ProjectConfig::parse("[lifetime]\nforever = true\n");
        assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
    }

    #[test]
    fn test_empty_filter_rejected() {
        let result = ProjectConfig::parse("[conformance]\nfilter = \"  \"\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_zero_max_entries_rejected() {
        let result = ProjectConfig::parse("[audit]\nmax-entries = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_enum_from_str() {
        assert_eq!(
            "owner_destroyed".parse::<DanglingWindow>(),
            Ok(DanglingWindow::OwnerDestroyed)
        );
        assert_eq!("PANIC".parse::<UsagePolicy>(), Ok(UsagePolicy::Panic));
        assert_eq!(
            "last-wins".parse::<OverrideResolution>(),
            Ok(OverrideResolution::LastWins)
        );
        assert!("sometimes".parse::<UsagePolicy>().is_err());
    }
}
