//! Integration tests for the conformance driver

mod common;

use common::assert_eq;
use gimarshal_config::RuntimeConfig;
use gimarshal_runtime::conformance::{self, CaseOutcome};
use rstest::rstest;

fn config(filter: Option<&str>, parallel: bool) -> RuntimeConfig {
    RuntimeConfig {
        filter: filter.map(str::to_string),
        parallel,
        ..RuntimeConfig::default()
    }
}

#[rstest]
#[case("scalars")]
#[case("strings")]
#[case("containers")]
#[case("records")]
#[case("objects")]
#[case("properties")]
#[case("callbacks")]
#[case("errors")]
fn test_category_passes(#[case] category: &str) {
    let report = conformance::run(&config(Some(&format!("{}/", category)), true));
    let failures: Vec<String> = report
        .failures()
        .map(|run| format!("{}: {:?}", run.id(), run.outcome))
        .collect();
    assert_eq!(failures, Vec::<String>::new());
    assert!(report.total() > 0);
    assert!(report.runs.iter().all(|run| run.category == category));
}

#[test]
fn test_every_category_is_covered() {
    let report = conformance::run(&config(None, true));
    let categories: Vec<&str> = report.by_category().keys().copied().collect();
    assert_eq!(
        categories,
        vec!["callbacks", "containers", "errors", "objects", "properties", "records", "scalars", "strings"]
    );
    assert!(report.is_success(), "{}", report);
}

#[test]
fn test_json_report_lists_every_case() {
    let report = conformance::run(&config(Some("errors/"), false));
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    let runs = json["runs"].as_array().unwrap();
    assert_eq!(runs.len(), report.total());
    assert!(runs.iter().all(|run| run["outcome"]["status"] == "pass"));
}

#[test]
fn test_unmatched_filter_runs_nothing() {
    let report = conformance::run(&config(Some("no-such-case"), true));
    assert_eq!(report.total(), 0);
    assert!(report.is_success());
    assert!(report.runs.iter().all(|run| run.outcome == CaseOutcome::Pass));
}
