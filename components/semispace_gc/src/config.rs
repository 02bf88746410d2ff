//! Heap configuration.

use crate::policy::GrowthPolicy;
use serde::{Deserialize, Serialize};

/// Default requested size of each semi-space.
pub const DEFAULT_SPACE_BYTES: usize = 64 * 1024;

/// Default floor applied to space sizes.
pub const DEFAULT_MIN_SPACE_BYTES: usize = 256;

/// How the collector decides which blocks survive a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Live means reachable from the roots through traced reference fields
    #[default]
    Reachability,
    /// Live means flagged ALLOCATED. Never reclaims unreleased garbage;
    /// only suitable for allocator-only use.
    AllocatedFlag,
}

/// Heap construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Requested payload capacity of each space
    pub initial_space_bytes: usize,
    /// Floor applied to `initial_space_bytes`
    pub min_space_bytes: usize,
    /// Liveness test used by the collector
    pub liveness: Liveness,
    /// Behavior on allocator exhaustion
    pub growth: GrowthPolicy,
    /// Run [`Heap::verify`](crate::Heap::verify) after every cycle
    pub verify_collections: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            initial_space_bytes: DEFAULT_SPACE_BYTES,
            min_space_bytes: DEFAULT_MIN_SPACE_BYTES,
            liveness: Liveness::default(),
            growth: GrowthPolicy::default(),
            verify_collections: false,
        }
    }
}

impl HeapConfig {
    /// Default configuration with a different initial space size.
    pub fn with_space_bytes(bytes: usize) -> Self {
        HeapConfig {
            initial_space_bytes: bytes,
            ..Self::default()
        }
    }
}
