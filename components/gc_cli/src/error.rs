//! Error types for the CLI

use semispace_gc::GcError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Heap operation failed
    #[error("heap error: {0}")]
    Gc(#[from] GcError),

    /// File I/O error
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration or report serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown log level name
    #[error("invalid log level '{0}'")]
    InvalidLogLevel(String),

    /// A logger was already installed
    #[error("logger error: {0}")]
    Logger(#[from] log::SetLoggerError),

    /// One or more self-test scenarios failed
    #[error("{failed} self-test scenario(s) failed")]
    SelftestFailed {
        /// Number of failed scenarios
        failed: usize,
        /// Rendered report
        output: String,
    },

    /// The stress workload found corrupted object contents
    #[error("workload check failed: {0}")]
    Workload(String),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
