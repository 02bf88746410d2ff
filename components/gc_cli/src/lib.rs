//! Collector driver library
//!
//! Provides argument parsing, configuration loading, the built-in self-test
//! scenarios and the seeded stress workload behind the `cpgc` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod error;
pub mod selftest;
pub mod workload;

pub use cli::{Cli, Command, LivenessArg};
pub use config::CliConfig;
pub use error::{CliError, CliResult};
pub use selftest::{run_selftest, ScenarioResult, SelftestReport};
pub use workload::{run_stress, StressOptions, StressReport};

use log::LevelFilter;

/// Installs `env_logger` on stderr, showing records at `level` and above.
///
/// Fails when a logger is already installed for this process.
pub fn init_logger(level: LevelFilter) -> CliResult<()> {
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .try_init()?;
    Ok(())
}

/// Runs the command selected by `cli` and returns what should be printed.
pub fn run(cli: &Cli, config: &CliConfig) -> CliResult<String> {
    match &cli.command {
        Command::Selftest => {
            let report = run_selftest();
            let out = if cli.json {
                serde_json::to_string_pretty(&report)?
            } else {
                report.to_string()
            };
            if report.failed() > 0 {
                return Err(CliError::SelftestFailed {
                    failed: report.failed(),
                    output: out,
                });
            }
            Ok(out)
        }
        Command::Stress(args) => {
            let options = StressOptions::from_args(args, &config.heap);
            let report = run_stress(&options)?;
            if cli.json {
                Ok(serde_json::to_string_pretty(&report)?)
            } else {
                Ok(report.to_string())
            }
        }
    }
}
