//! Semi-space collector driver
//!
//! Entry point for `cpgc`. Parses arguments, loads the configuration,
//! installs the logger and runs the selected command.

use clap::Parser as ClapParser;
use gc_cli::{init_logger, run, Cli, CliConfig, CliError};

fn main() {
    let cli = Cli::parse();

    let config = match CliConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: could not load configuration: {}", e);
            std::process::exit(2);
        }
    };
    match config.log_level(cli.verbose) {
        Ok(level) => {
            if let Err(e) = init_logger(level) {
                eprintln!("Warning: {}", e);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }

    match run(&cli, &config) {
        Ok(output) => println!("{}", output),
        Err(CliError::SelftestFailed { failed, output }) => {
            println!("{}", output);
            eprintln!("Error: {} scenario(s) failed", failed);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
