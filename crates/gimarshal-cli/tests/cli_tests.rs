//! End-to-end tests for the `gimarshal` binary
//!
//! Every command runs in a scratch directory so no project or user
//! configuration leaks in.

use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn gimarshal(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("gimarshal");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env_remove("GIMARSHAL_JSON")
        .env_remove("GIMARSHAL_PARALLEL")
        .env_remove("GIMARSHAL_DANGLING")
        .env_remove("GIMARSHAL_USAGE_POLICY")
        .env_remove("GIMARSHAL_AMBIGUOUS_OVERRIDE")
        .env_remove("GIMARSHAL_AUDIT")
        .env("NO_COLOR", "1");
    cmd
}

// ============================================================================
// gimarshal conformance
// ============================================================================

#[test]
fn test_conformance_passes() {
    let dir = TempDir::new().unwrap();
    gimarshal(&dir)
        .arg("conformance")
        .assert()
        .success()
        .stdout(predicate::str::contains("PASSED"))
        .stdout(predicate::str::contains("0 failed"));
}

#[test]
fn test_conformance_filter_verbose() {
    let dir = TempDir::new().unwrap();
    gimarshal(&dir)
        .args(["conformance", "--filter", "errors/", "--verbose", "--sequential"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS errors/thrown"))
        .stdout(predicate::str::contains("objects/").not());
}

#[test]
fn test_conformance_json() {
    let dir = TempDir::new().unwrap();
    let output = gimarshal(&dir)
        .args(["conformance", "--filter", "records/", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let runs = report["runs"].as_array().unwrap();
    assert!(!runs.is_empty());
    assert!(runs.iter().all(|run| run["category"] == "records"));
}

#[test]
fn test_conformance_no_match() {
    let dir = TempDir::new().unwrap();
    gimarshal(&dir)
        .args(["conformance", "--filter", "nothing-matches-this"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No cases matched"));
}

#[test]
fn test_conformance_reads_project_config() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("gimarshal.toml"),
        "[conformance]\nfilter = \"callbacks/\"\nparallel = false\n",
    )
    .unwrap();
    gimarshal(&dir)
        .args(["conformance", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::contains("callbacks/notified"))
        .stdout(predicate::str::contains("strings/").not());
}

#[test]
fn test_conformance_bad_config_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("gimarshal.toml"), "[usage]\npolicy = \"ignore\"\n").unwrap();
    gimarshal(&dir)
        .arg("conformance")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

// ============================================================================
// gimarshal describe / resolve
// ============================================================================

#[test]
fn test_describe_lists_types() {
    let dir = TempDir::new().unwrap();
    gimarshal(&dir)
        .arg("describe")
        .assert()
        .success()
        .stdout(predicate::str::contains("SharedStruct"))
        .stdout(predicate::str::contains("Functions:"));
}

#[test]
fn test_describe_record() {
    let dir = TempDir::new().unwrap();
    gimarshal(&dir)
        .args(["describe", "SharedStruct"])
        .assert()
        .success()
        .stdout(predicate::str::contains("record SharedStruct (refcounted)"));
}

#[test]
fn test_describe_unknown_fails() {
    let dir = TempDir::new().unwrap();
    gimarshal(&dir)
        .args(["describe", "NoSuchThing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NoSuchThing"));
}

#[test]
fn test_resolve_in_none() {
    let dir = TempDir::new().unwrap();
    gimarshal(&dir)
        .args(["resolve", "in", "none", "utf8[]"])
        .assert()
        .success()
        .stdout(predicate::str::contains("caller frees:   skeleton=true elements=true"))
        .stdout(predicate::str::contains("call-duration"));
}

#[test]
fn test_resolve_json() {
    let dir = TempDir::new().unwrap();
    let output = gimarshal(&dir)
        .args(["resolve", "out", "container", "list<utf8>", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["plan"]["caller_frees"]["skeleton"], true);
    assert_eq!(value["plan"]["caller_frees"]["elements"], false);
    assert_eq!(value["mode"], "container");
}

#[test]
fn test_resolve_container_on_leaf_fails() {
    let dir = TempDir::new().unwrap();
    gimarshal(&dir)
        .args(["resolve", "in", "container", "int32"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("leaf"));
}
