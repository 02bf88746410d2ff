//! Configuration file loading.
//!
//! The file is JSON. Every field is optional:
//!
//! ```json
//! {
//!   "log_level": "debug",
//!   "heap": { "initial_space_bytes": 4096, "growth": { "max_space_bytes": 1048576 } }
//! }
//! ```

use crate::error::{CliError, CliResult};
use log::LevelFilter;
use semispace_gc::HeapConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Contents of a `--config` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Log level name (`off`, `error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: Option<String>,
    /// Heap parameters
    pub heap: HeapConfig,
}

impl CliConfig {
    /// Reads a configuration file, or returns defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::from_json(&text)
            }
        }
    }

    /// Parses a configuration from JSON text.
    pub fn from_json(text: &str) -> CliResult<Self> {
        let config: CliConfig = serde_json::from_str(text)?;
        config.file_level()?;
        Ok(config)
    }

    /// Level named in the file, if any.
    pub fn file_level(&self) -> CliResult<Option<LevelFilter>> {
        self.log_level
            .as_deref()
            .map(|name| {
                LevelFilter::from_str(name).map_err(|_| CliError::InvalidLogLevel(name.to_string()))
            })
            .transpose()
    }

    /// Effective level: `-v` flags win over the file, which wins over the
    /// default of `warn`.
    pub fn log_level(&self, verbose: u8) -> CliResult<LevelFilter> {
        Ok(match verbose {
            0 => self.file_level()?.unwrap_or(LevelFilter::Warn),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
    }
}
