//! Comprobador: command-line interface for Comprobar
//!
//! ## Usage
//!
//! ```bash
//! comprobador run checkout.yaml --device mobile   # Run a test in Chromium
//! comprobador validate tests/*.yaml                # Check definitions
//! comprobador compare shot.png -t checkout -s step-3
//! comprobador diff expected.json actual.json      # Structural JSON diff
//! comprobador devices                             # List device profiles
//! ```

use clap::Parser;
use comprobador::{runner, Cli, CliConfig, CliError, CliResult, Commands, Verbosity};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(config.verbosity);

    let output = match &cli.command {
        Commands::Run(args) => {
            let engine = runner::run_config(runner::load_engine_config(cli.config.as_deref())?, args);
            let rt = tokio::runtime::Runtime::new()
                .map_err(|e| CliError::config(format!("Failed to create runtime: {e}")))?;
            rt.block_on(runner::run(engine, args))?
        }
        Commands::Validate(args) => runner::validate(args)?,
        Commands::Compare(args) => {
            runner::compare(&runner::load_engine_config(cli.config.as_deref())?, args)?
        }
        Commands::Baseline(args) => {
            runner::baseline(&runner::load_engine_config(cli.config.as_deref())?, args)?
        }
        Commands::Diff(args) => runner::diff(args)?,
        Commands::Devices(args) => runner::devices(args)?,
    };
    print!("{output}");
    Ok(())
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new().with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
}

/// Logs go to stderr so command output on stdout stays machine readable.
/// `RUST_LOG` wins over the flags.
fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
