use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod reporter;

/// Marshalling contract checker for introspection-driven bindings.
///
/// Runs the conformance matrix against the native fixture library, prints
/// type descriptors and explains who allocates and who frees a value.
///
/// EXAMPLES:
///     gimarshal conformance                  Run every case
///     gimarshal conformance --filter array   Run matching cases only
///     gimarshal describe BoxedStruct         Print a descriptor
///     gimarshal resolve out full 'utf8[]'    Print a transfer plan
///
/// ENVIRONMENT VARIABLES:
///     GIMARSHAL_JSON    Set to '1' for JSON output by default
///     NO_COLOR          Set to disable colored output
#[derive(Parser)]
#[command(name = "gimarshal")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the conformance matrix
    ///
    /// Every case runs against a fresh boundary and must leave nothing
    /// outstanding. Exits with status 1 when any case fails.
    ///
    /// EXAMPLES:
    ///     gimarshal conformance                     Run all cases in parallel
    ///     gimarshal conformance --filter objects/   One category
    ///     gimarshal conformance --json              Machine-readable report
    #[command(visible_alias = "t")]
    Conformance {
        /// Only run cases whose `category/name` contains this string
        #[arg(long, short = 'f')]
        filter: Option<String>,
        /// Output the report as JSON
        #[arg(long, env = "GIMARSHAL_JSON")]
        json: bool,
        /// Run cases one after another
        #[arg(long)]
        sequential: bool,
        /// Print every case and the audit log of failures
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Print type descriptors of the fixture library
    ///
    /// Without a name, lists every registered type and function.
    ///
    /// EXAMPLES:
    ///     gimarshal describe               List everything
    ///     gimarshal describe Object        One type
    ///     gimarshal describe gerror_out    One function signature
    Describe {
        /// Type or function name
        name: Option<String>,
    },

    /// Print the transfer plan for a direction, mode and type
    ///
    /// EXAMPLES:
    ///     gimarshal resolve in none utf8
    ///     gimarshal resolve out container 'list<utf8>'
    ///     gimarshal resolve inout full Object --json
    Resolve {
        /// in, out, out-caller-allocates or inout
        direction: String,
        /// none, container or full
        mode: String,
        /// Type spelling, e.g. `int32`, `utf8[]`, `map<utf8, utf8>`, `BoxedStruct`
        #[arg(name = "TYPE")]
        ty: String,
        /// Output the plan as JSON
        #[arg(long, env = "GIMARSHAL_JSON")]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cli_config = config::Config::from_env();

    match cli.command {
        Commands::Conformance {
            filter,
            json,
            sequential,
            verbose,
            no_color,
        } => {
            let args = commands::conformance::ConformanceArgs {
                filter,
                json: json || cli_config.default_json,
                sequential,
                verbose,
                no_color: no_color || cli_config.no_color,
                dir: std::env::current_dir()?,
            };
            commands::conformance::run(args)?;
        }
        Commands::Describe { name } => {
            commands::describe::run(name.as_deref())?;
        }
        Commands::Resolve {
            direction,
            mode,
            ty,
            json,
        } => {
            commands::resolve::run(&direction, &mode, &ty, json || cli_config.default_json)?;
        }
    }

    Ok(())
}
