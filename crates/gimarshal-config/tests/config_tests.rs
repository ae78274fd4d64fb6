//! Configuration loading and precedence tests

use gimarshal_config::{
    ConfigLoader, DanglingWindow, OverrideResolution, ProjectConfig, RuntimeConfig, UsagePolicy,
    CONFIG_FILE_NAME,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn create_config_file(dir: &Path, content: &str) -> std::path::PathBuf {
    let config_path = dir.join(CONFIG_FILE_NAME);
    fs::write(&config_path, content).unwrap();
    config_path
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
#[serial]
fn test_load_when_no_config_exists() {
    let temp_dir = TempDir::new().unwrap();

    let mut loader = ConfigLoader::new();
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert!(!config.is_project());
    assert_eq!(config.runtime(), RuntimeConfig::default());
}

#[test]
#[serial]
fn test_load_from_specific_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(
        temp_dir.path(),
        r#"
[dispatch]
ambiguous-override = "last-wins"

[conformance]
filter = "callback"
"#,
    );

    let mut loader = ConfigLoader::new();
    let config = loader.load_from_file(&path).unwrap();
    let runtime = config.runtime();

    assert_eq!(runtime.ambiguous_override, OverrideResolution::LastWins);
    assert_eq!(runtime.filter.as_deref(), Some("callback"));
    assert!(runtime.parallel);
}

#[test]
#[serial]
fn test_invalid_toml_reports_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[usage\npolicy = 1");

    let mut loader = ConfigLoader::new();
    let err = loader.load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains(CONFIG_FILE_NAME));
}

// ============================================================================
// Environment Precedence Tests
// ============================================================================

#[rstest]
#[case("GIMARSHAL_PARALLEL", "0")]
#[case("GIMARSHAL_AUDIT", "false")]
#[serial]
fn test_env_disables_boolean_settings(#[case] var: &str, #[case] value: &str) {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        "[conformance]\nparallel = true\n\n[audit]\nenabled = true\n",
    );

    env::set_var(var, value);
    let mut loader = ConfigLoader::new();
    let config = loader.load_from_directory(temp_dir.path()).unwrap();
    env::remove_var(var);

    let runtime = config.runtime();
    match var {
        "GIMARSHAL_PARALLEL" => assert!(!runtime.parallel),
        _ => assert!(!runtime.audit_enabled),
    }
}

#[test]
#[serial]
fn test_env_overrides_project_policy() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[usage]\npolicy = \"propagate\"\n");

    env::set_var("GIMARSHAL_USAGE_POLICY", "panic");
    env::set_var("GIMARSHAL_AMBIGUOUS_OVERRIDE", "last-wins");
    let mut loader = ConfigLoader::new();
    let config = loader.load_from_directory(temp_dir.path()).unwrap();
    env::remove_var("GIMARSHAL_USAGE_POLICY");
    env::remove_var("GIMARSHAL_AMBIGUOUS_OVERRIDE");

    let runtime = config.runtime();
    assert_eq!(runtime.usage_policy, UsagePolicy::Panic);
    assert_eq!(runtime.ambiguous_override, OverrideResolution::LastWins);
    assert_eq!(runtime.dangling, DanglingWindow::NextCall);
}

#[test]
fn test_project_config_roundtrips_through_toml() {
    let config = ProjectConfig::parse("[lifetime]\ndangling = \"owner-destroyed\"\n").unwrap();
    let rendered = toml::to_string(&config).unwrap();
    let reparsed = ProjectConfig::parse(&rendered).unwrap();
    assert_eq!(config, reparsed);
}
