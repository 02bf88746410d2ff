//! Command-line arguments.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use semispace_gc::Liveness;
use std::path::PathBuf;

/// Semi-space collector driver
#[derive(Parser, Debug)]
#[command(name = "cpgc", version, about = "Self-test and stress driver for the semi-space collector")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the built-in allocator and collector scenarios
    Selftest,
    /// Run a seeded random workload against a heap
    Stress(StressArgs),
}

/// Arguments of `cpgc stress`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct StressArgs {
    /// Requested size of each semi-space in bytes (overrides the config file)
    #[arg(long, value_name = "BYTES")]
    pub heap: Option<usize>,

    /// Number of operations to run
    #[arg(long, default_value_t = 10_000)]
    pub operations: usize,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Liveness test used by the collector (overrides the config file)
    #[arg(long, value_enum)]
    pub liveness: Option<LivenessArg>,

    /// Verify heap integrity after every collection
    #[arg(long)]
    pub verify: bool,
}

/// Liveness choices on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessArg {
    /// Reachable from the roots
    Reachability,
    /// Flagged allocated and not released
    AllocatedFlag,
}

impl From<LivenessArg> for Liveness {
    fn from(arg: LivenessArg) -> Self {
        match arg {
            LivenessArg::Reachability => Liveness::Reachability,
            LivenessArg::AllocatedFlag => Liveness::AllocatedFlag,
        }
    }
}
