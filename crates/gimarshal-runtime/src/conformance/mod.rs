//! Conformance driver
//!
//! Runs the marshalling matrix against the native fixture. Every case gets
//! a fresh `Boundary`, so cases are independent and may run in parallel.
//! A case passes when its body succeeds and the boundary is left clean:
//! no host-owned block, callback or object reference outstanding, and no
//! ownership contract violation in the audit log unless the case provokes
//! one on purpose.

mod callbacks;
mod check;
mod containers;
mod errors;
mod objects;
mod properties;
mod records;
mod scalars;
mod strings;

pub use check::{CaseResult, Failure};

use crate::boundary::Boundary;
use crate::error::TransferMismatch;
use gimarshal_config::{RuntimeConfig, UsagePolicy};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// One conformance case
#[derive(Debug, Clone, Copy)]
pub struct Case {
    pub category: &'static str,
    pub name: &'static str,
    pub body: fn(&mut Boundary) -> CaseResult,
    /// The body provokes a usage error and checks it was reported
    pub provokes_violation: bool,
}

impl Case {
    pub const fn new(category: &'static str, name: &'static str, body: fn(&mut Boundary) -> CaseResult) -> Self {
        Self {
            category,
            name,
            body,
            provokes_violation: false,
        }
    }

    pub const fn provoking_violation(mut self) -> Self {
        self.provokes_violation = true;
        self
    }

    /// `category/name`, the string filters match against
    pub fn id(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }
}

/// Outcome of a single case
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CaseOutcome {
    Pass,
    Fail { reason: String },
}

impl CaseOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, CaseOutcome::Pass)
    }
}

/// A completed case
#[derive(Debug, Clone, Serialize)]
pub struct CaseRun {
    pub category: &'static str,
    pub name: &'static str,
    pub outcome: CaseOutcome,
    /// Ownership left behind by a case whose body succeeded
    pub findings: Vec<TransferMismatch>,
    pub duration: Duration,
    /// Audit log lines of a failed case
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

impl CaseRun {
    pub fn id(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }
}

/// Result of a conformance run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConformanceReport {
    pub runs: Vec<CaseRun>,
    pub duration: Duration,
}

impl ConformanceReport {
    pub fn total(&self) -> usize {
        self.runs.len()
    }

    pub fn passed(&self) -> usize {
        self.runs.iter().filter(|r| r.outcome.is_pass()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseRun> {
        self.runs.iter().filter(|r| !r.outcome.is_pass())
    }

    /// Runs grouped by category, categories in name order
    pub fn by_category(&self) -> BTreeMap<&'static str, Vec<&CaseRun>> {
        let mut groups: BTreeMap<&'static str, Vec<&CaseRun>> = BTreeMap::new();
        for run in &self.runs {
            groups.entry(run.category).or_default().push(run);
        }
        groups
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} total",
            self.passed(),
            self.failed(),
            self.total()
        )
    }
}

/// Every case in the matrix, in category order
pub fn cases() -> Vec<Case> {
    let mut all = Vec::new();
    all.extend(scalars::cases());
    all.extend(strings::cases());
    all.extend(containers::cases());
    all.extend(records::cases());
    all.extend(objects::cases());
    all.extend(properties::cases());
    all.extend(callbacks::cases());
    all.extend(errors::cases());
    all
}

/// Cases selected by the configured filter
pub fn select(config: &RuntimeConfig) -> Vec<Case> {
    let all = cases();
    match &config.filter {
        Some(filter) => all
            .into_iter()
            .filter(|case| case.id().contains(filter.as_str()))
            .collect(),
        None => all,
    }
}

/// Run the selected cases, in parallel when configured
pub fn run(config: &RuntimeConfig) -> ConformanceReport {
    run_cases(&select(config), config)
}

pub fn run_cases(cases: &[Case], config: &RuntimeConfig) -> ConformanceReport {
    let start = Instant::now();
    let case_config = case_config(config);
    let runs = if config.parallel {
        cases
            .par_iter()
            .map(|case| run_case(case, &case_config))
            .collect()
    } else {
        cases
            .iter()
            .map(|case| run_case(case, &case_config))
            .collect()
    };
    ConformanceReport {
        runs,
        duration: start.elapsed(),
    }
}

/// Cases report violations instead of aborting, and always keep an audit log
fn case_config(config: &RuntimeConfig) -> RuntimeConfig {
    RuntimeConfig {
        usage_policy: UsagePolicy::Propagate,
        audit_enabled: true,
        ..config.clone()
    }
}

fn run_case(case: &Case, config: &RuntimeConfig) -> CaseRun {
    let start = Instant::now();
    let mut run = CaseRun {
        category: case.category,
        name: case.name,
        outcome: CaseOutcome::Pass,
        findings: Vec::new(),
        duration: Duration::ZERO,
        log: Vec::new(),
    };

    let mut boundary = match Boundary::with_fixture(config.clone()) {
        Ok(boundary) => boundary,
        Err(error) => {
            run.outcome = CaseOutcome::Fail {
                reason: format!("fixture library failed to load: {}", error),
            };
            run.duration = start.elapsed();
            return run;
        }
    };

    run.outcome = match (case.body)(&mut boundary) {
        Ok(()) => {
            run.findings = findings(case, &mut boundary);
            match run.findings.first() {
                None => CaseOutcome::Pass,
                Some(first) => CaseOutcome::Fail {
                    reason: first.to_string(),
                },
            }
        }
        Err(failure) => CaseOutcome::Fail {
            reason: failure.to_string(),
        },
    };
    if !run.outcome.is_pass() {
        run.log = boundary
            .audit()
            .entries()
            .iter()
            .map(|entry| entry.to_log_line())
            .collect();
    }
    run.duration = start.elapsed();
    run
}

/// Ownership the case left behind
fn findings(case: &Case, boundary: &mut Boundary) -> Vec<TransferMismatch> {
    let mut findings = Vec::new();
    if let Err(error) = boundary.flush() {
        findings.push(TransferMismatch {
            subject: case.id(),
            expected: "lent values released cleanly".to_string(),
            observed: error.to_string(),
        });
    }
    let leaks = boundary.leaks();
    if !leaks.is_clean() {
        findings.push(TransferMismatch {
            subject: case.id(),
            expected: "every host-owned block, callback and object reference released".to_string(),
            observed: leaks.to_string(),
        });
    }
    if !case.provokes_violation {
        for event in boundary.audit().events_of("usage-violation") {
            findings.push(TransferMismatch {
                subject: case.id(),
                expected: "no contract violation".to_string(),
                observed: event.to_string(),
            });
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_case_ids_are_unique() {
        let all = cases();
        let ids: HashSet<String> = all.iter().map(Case::id).collect();
        assert_eq!(ids.len(), all.len());
    }

    #[test]
    fn test_filter_selects_by_id() {
        let config = RuntimeConfig {
            filter: Some("strings/".to_string()),
            ..RuntimeConfig::default()
        };
        let selected = select(&config);
        assert!(!selected.is_empty());
        assert!(selected.iter().all(|case| case.category == "strings"));
    }

    #[test]
    fn test_full_matrix_passes() {
        let report = run(&RuntimeConfig::default());
        let failures: Vec<String> = report
            .failures()
            .map(|run| format!("{}: {:?}", run.id(), run.outcome))
            .collect();
        assert!(failures.is_empty(), "{:#?}", failures);
        assert!(report.total() > 50);
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let config = RuntimeConfig {
            parallel: false,
            filter: Some("objects/".to_string()),
            ..RuntimeConfig::default()
        };
        let sequential = run(&config);
        let parallel = run(&RuntimeConfig {
            parallel: true,
            ..config
        });
        assert_eq!(sequential.total(), parallel.total());
        assert_eq!(sequential.passed(), parallel.passed());
    }

    fn leaky(boundary: &mut Boundary) -> CaseResult {
        // a callback the native side never sees, so nobody releases it
        boundary.register_callback(crate::callback::HostClosure::new(|_, _| Ok(Vec::new())));
        Ok(())
    }

    fn object_kept(boundary: &mut Boundary) -> CaseResult {
        boundary.new_object("Object")?;
        Ok(())
    }

    fn failing(_: &mut Boundary) -> CaseResult {
        Err(Failure::Check("deliberate".to_string()))
    }

    #[test]
    fn test_leak_is_reported_as_mismatch() {
        let report = run_cases(&[Case::new("driver", "leaky", leaky)], &RuntimeConfig::default());
        let run = &report.runs[0];
        assert!(!run.outcome.is_pass());
        assert_eq!(run.findings.len(), 1);
        assert!(run.findings[0].observed.contains("callbacks"));
        assert!(!run.log.is_empty());
    }

    #[test]
    fn test_unreleased_object_is_reported_as_mismatch() {
        let report = run_cases(&[Case::new("driver", "object_kept", object_kept)], &RuntimeConfig::default());
        let run = &report.runs[0];
        assert!(!run.outcome.is_pass());
        assert_eq!(run.findings.len(), 1);
        assert!(run.findings[0].observed.contains("objects ["));
    }

    #[test]
    fn test_failure_reason_kept() {
        let report = run_cases(&[Case::new("driver", "failing", failing)], &RuntimeConfig::default());
        assert_eq!(
            report.runs[0].outcome,
            CaseOutcome::Fail {
                reason: "deliberate".to_string()
            }
        );
        assert_eq!(report.to_string(), "0 passed, 1 failed, 1 total");
    }

    #[test]
    fn test_report_serializes() {
        let report = run_cases(&[Case::new("driver", "failing", failing)], &RuntimeConfig::default());
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["runs"][0]["outcome"]["status"], "fail");
        assert_eq!(value["runs"][0]["name"], "failing");
    }
}
