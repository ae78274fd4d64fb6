//! Conformance reporter - display case results

use colored::*;
use gimarshal_runtime::conformance::{CaseOutcome, CaseRun, ConformanceReport};
use std::io::{self, Write};

/// Conformance reporter with output configuration
pub struct Reporter {
    /// Show every case and the audit log of failures
    verbose: bool,
    /// Disable colored output
    no_color: bool,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Reporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            no_color: false,
        }
    }

    pub fn with_no_color(mut self, no_color: bool) -> Self {
        self.no_color = no_color;
        self
    }

    /// Report a conformance run
    pub fn report(&self, report: &ConformanceReport) {
        if self.no_color {
            colored::control::set_override(false);
        }

        for run in &report.runs {
            self.print_case(run);
        }

        // dots need a newline before the summary
        if !self.verbose && !report.runs.is_empty() {
            println!();
        }

        println!();
        self.print_summary(report);
        self.print_failures(report);

        if self.no_color {
            colored::control::unset_override();
        }
    }

    fn print_case(&self, run: &CaseRun) {
        match &run.outcome {
            CaseOutcome::Pass => {
                if self.verbose {
                    println!("{} {} ({:.2?})", "PASS".green().bold(), run.id(), run.duration);
                } else {
                    print!("{}", ".".green());
                    let _ = io::stdout().flush();
                }
            }
            CaseOutcome::Fail { .. } => {
                if self.verbose {
                    println!("{} {} ({:.2?})", "FAIL".red().bold(), run.id(), run.duration);
                } else {
                    print!("{}", "F".red().bold());
                    let _ = io::stdout().flush();
                }
            }
        }
    }

    fn print_summary(&self, report: &ConformanceReport) {
        println!("{}", "─".repeat(50));

        let status = if report.is_success() {
            "PASSED".green().bold()
        } else {
            "FAILED".red().bold()
        };
        let failed = report.failed();

        println!(
            "Conformance: {} | {} total, {} passed, {} failed",
            status,
            report.total().to_string().bold(),
            report.passed().to_string().green().bold(),
            if failed > 0 {
                failed.to_string().red().bold()
            } else {
                failed.to_string().normal()
            }
        );

        if self.verbose {
            for (category, runs) in report.by_category() {
                let passed = runs.iter().filter(|r| r.outcome.is_pass()).count();
                println!("  {:<12} {}/{}", category, passed, runs.len());
            }
        }
        println!("Time: {:.2?}", report.duration);
    }

    fn print_failures(&self, report: &ConformanceReport) {
        let failures: Vec<_> = report.failures().collect();
        if failures.is_empty() {
            return;
        }

        println!();
        println!("{}", "Failures:".red().bold());
        println!();

        for run in failures {
            println!("  {} {}", "●".red(), run.id().bold());
            if let CaseOutcome::Fail { reason } = &run.outcome {
                for line in reason.lines() {
                    println!("      {}", line.dimmed());
                }
            }
            for finding in run.findings.iter().skip(1) {
                println!("      {}", finding.to_string().dimmed());
            }
            if self.verbose && !run.log.is_empty() {
                println!("    {}", "audit log:".yellow());
                for line in &run.log {
                    println!("      {}", line);
                }
            }
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run(name: &'static str, outcome: CaseOutcome) -> CaseRun {
        CaseRun {
            category: "strings",
            name,
            outcome,
            findings: Vec::new(),
            duration: Duration::from_millis(3),
            log: vec!["call utf8_none_in (epoch 1)".to_string()],
        }
    }

    #[test]
    fn test_reporter_all_pass() {
        let report = ConformanceReport {
            runs: vec![run("in", CaseOutcome::Pass), run("out", CaseOutcome::Pass)],
            duration: Duration::from_millis(6),
        };
        // Just verify it doesn't panic
        Reporter::new(true).with_no_color(true).report(&report);
    }

    #[test]
    fn test_reporter_with_failures() {
        let report = ConformanceReport {
            runs: vec![
                run("in", CaseOutcome::Pass),
                run(
                    "out",
                    CaseOutcome::Fail {
                        reason: "utf8_none_out: expected \"a\"\ngot \"b\"".to_string(),
                    },
                ),
            ],
            duration: Duration::from_millis(6),
        };
        assert!(!report.is_success());
        Reporter::new(true).with_no_color(true).report(&report);
        Reporter::new(false).with_no_color(true).report(&report);
    }

    #[test]
    fn test_reporter_empty() {
        Reporter::default().with_no_color(true).report(&ConformanceReport::default());
    }
}
