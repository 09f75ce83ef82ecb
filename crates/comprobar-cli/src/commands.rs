//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Comprobador: CLI for Comprobar - browser test execution and verification
#[derive(Parser, Debug)]
#[command(name = "comprobador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Engine configuration file (YAML)
    #[arg(short, long, global = true, env = "COMPROBAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a test definition in a real browser
    Run(RunArgs),

    /// Check that a test definition parses and its steps are well ordered
    Validate(ValidateArgs),

    /// Compare a screenshot with its stored baseline
    Compare(CompareArgs),

    /// Store a screenshot as the baseline for a test step
    Baseline(BaselineArgs),

    /// Structurally diff two JSON documents
    Diff(DiffArgs),

    /// List the built-in device profiles
    Devices(DevicesArgs),
}

/// Output format for command results
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
    /// YAML
    Yaml,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Test definition file (YAML or JSON)
    pub definition: PathBuf,

    /// Device profile to emulate
    #[arg(short, long, default_value = comprobar::DEFAULT_PROFILE)]
    pub device: String,

    /// Root directory for run artifacts
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Watchdog ceiling in milliseconds
    #[arg(long)]
    pub watchdog_ms: Option<u64>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Chromium executable
    #[arg(long, env = "CHROMIUM_PATH")]
    pub chromium: Option<PathBuf>,

    /// Write the run report here instead of stdout
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: OutputFormat,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Test definition files
    #[arg(required = true)]
    pub definitions: Vec<PathBuf>,
}

/// Where baselines and diffs live, shared by the image commands
#[derive(Parser, Debug, Clone)]
pub struct BaselineKey {
    /// Test id the baseline belongs to
    #[arg(short, long)]
    pub test: String,

    /// Step key within the test (for example `step-3`)
    #[arg(short, long)]
    pub step: String,

    /// Baseline directory
    #[arg(long)]
    pub baselines: Option<PathBuf>,
}

/// Arguments for the compare command
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Screenshot to compare
    pub screenshot: PathBuf,

    #[command(flatten)]
    pub key: BaselineKey,

    /// Diff image directory
    #[arg(long)]
    pub diffs: Option<PathBuf>,

    /// Minimum similarity (0.0-1.0)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the baseline command
#[derive(Parser, Debug)]
pub struct BaselineArgs {
    /// Screenshot to store
    pub screenshot: PathBuf,

    #[command(flatten)]
    pub key: BaselineKey,
}

/// Arguments for the diff command
#[derive(Parser, Debug)]
pub struct DiffArgs {
    /// Expected document; only its fields are checked
    pub expected: PathBuf,

    /// Actual document
    pub actual: PathBuf,

    /// Path prefix for reported differences
    #[arg(long, default_value = "")]
    pub root: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the devices command
#[derive(Parser, Debug)]
pub struct DevicesArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_run_defaults() {
            let cli = Cli::try_parse_from(["comprobador", "run", "t.yaml"]).unwrap();
            let Commands::Run(args) = cli.command else {
                panic!("expected run");
            };
            assert_eq!(args.device, "desktop");
            assert_eq!(args.format, OutputFormat::Json);
            assert!(!args.headed);
        }

        #[test]
        fn test_global_flags_after_subcommand() {
            let cli = Cli::try_parse_from(["comprobador", "devices", "-vv", "-q"]).unwrap();
            assert_eq!(cli.verbose, 2);
            assert!(cli.quiet);
        }

        #[test]
        fn test_compare_requires_key() {
            assert!(Cli::try_parse_from(["comprobador", "compare", "a.png"]).is_err());
            let cli = Cli::try_parse_from([
                "comprobador", "compare", "a.png", "--test", "t1", "--step", "step-0",
                "--threshold", "0.9",
            ])
            .unwrap();
            let Commands::Compare(args) = cli.command else {
                panic!("expected compare");
            };
            assert_eq!(args.key.test, "t1");
            assert_eq!(args.threshold, Some(0.9));
        }

        #[test]
        fn test_validate_needs_a_file() {
            assert!(Cli::try_parse_from(["comprobador", "validate"]).is_err());
        }
    }
}
