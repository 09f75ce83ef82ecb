//! Comprobador CLI Library
//!
//! Command-line interface for the Comprobar verification engine.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Error types are self-documenting

mod commands;
mod config;
mod error;
pub mod runner;

pub use commands::{
    BaselineArgs, BaselineKey, Cli, Commands, CompareArgs, DevicesArgs, DiffArgs, OutputFormat,
    RunArgs, ValidateArgs,
};
pub use config::{CliConfig, Verbosity};
pub use error::{CliError, CliResult};
