//! Conformance command - run the marshalling matrix

use crate::reporter::Reporter;
use anyhow::{Context, Result};
use colored::*;
use gimarshal_config::ConfigLoader;
use gimarshal_runtime::conformance;
use std::path::PathBuf;

/// Arguments for the conformance command
pub struct ConformanceArgs {
    /// Substring of `category/name`
    pub filter: Option<String>,
    pub json: bool,
    /// Run cases one after another instead of in parallel
    pub sequential: bool,
    pub verbose: bool,
    pub no_color: bool,
    /// Where to start looking for gimarshal.toml
    pub dir: PathBuf,
}

impl Default for ConformanceArgs {
    fn default() -> Self {
        Self {
            filter: None,
            json: false,
            sequential: false,
            verbose: false,
            no_color: false,
            dir: PathBuf::from("."),
        }
    }
}

/// Run the conformance command
pub fn run(args: ConformanceArgs) -> Result<()> {
    let loaded = ConfigLoader::new()
        .load_from_directory(&args.dir)
        .context("failed to load configuration")?;
    let mut config = loaded.runtime();

    // flags override the file
    if args.filter.is_some() {
        config.filter = args.filter.clone();
    }
    if args.sequential {
        config.parallel = false;
    }
    let verbose = args.verbose || loaded.user.verbose();
    let no_color = args.no_color || !loaded.user.color();

    let selected = conformance::select(&config);
    if selected.is_empty() {
        if args.json {
            println!(
                "{}",
                serde_json::json!({
                    "runs": [],
                    "message": "No cases matched"
                })
            );
        } else {
            println!("{}", "No cases matched.".yellow());
        }
        return Ok(());
    }

    if !args.json {
        if no_color {
            colored::control::set_override(false);
        }
        println!(
            "Running {} case{}",
            selected.len().to_string().bold(),
            if selected.len() == 1 { "" } else { "s" }
        );
        println!();
    }

    let report = conformance::run_cases(&selected, &config);

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        Reporter::new(verbose).with_no_color(no_color).report(&report);
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_no_cases_matched() {
        let dir = tempdir().unwrap();
        let args = ConformanceArgs {
            filter: Some("no-such-case".to_string()),
            no_color: true,
            dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(run(args).is_ok());
    }

    #[test]
    fn test_invalid_project_config_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("gimarshal.toml"), "[lifetime]\ndangling = \"forever\"\n").unwrap();
        let args = ConformanceArgs {
            dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let err = run(args).unwrap_err();
        assert!(err.to_string().contains("failed to load configuration"));
    }
}
