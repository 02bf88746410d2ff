//! Heap-growth policy.
//!
//! When the allocator runs dry it works through the enabled strategies in a
//! fixed order, retrying the allocation after each: collect first, then grow.

use crate::header::HEADER_SIZE;
use heap_types::{align_to_word, GcError, GcResult};
use serde::{Deserialize, Serialize};

/// A recovery step tried on allocator exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Run a collection cycle and retry
    Collect,
    /// Append a segment to both spaces and retry
    Grow,
}

/// Which strategies run on exhaustion and how growth is sized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthPolicy {
    /// Try a collection before growing
    pub collect_on_exhaustion: bool,
    /// Allow acquiring new segments
    pub allow_growth: bool,
    /// Capacity multiplier per growth step; 2 doubles each space
    pub growth_factor: usize,
    /// Upper bound on the capacity of each space
    pub max_space_bytes: Option<usize>,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        GrowthPolicy {
            collect_on_exhaustion: true,
            allow_growth: true,
            growth_factor: 2,
            max_space_bytes: None,
        }
    }
}

impl GrowthPolicy {
    /// Policy that never collects or grows; exhaustion is immediately fatal.
    pub fn fixed() -> Self {
        GrowthPolicy {
            collect_on_exhaustion: false,
            allow_growth: false,
            ..Self::default()
        }
    }

    /// Enabled strategies in the order they are tried.
    pub fn strategies(&self) -> Vec<Strategy> {
        let mut order = Vec::with_capacity(2);
        if self.collect_on_exhaustion {
            order.push(Strategy::Collect);
        }
        if self.allow_growth {
            order.push(Strategy::Grow);
        }
        order
    }

    /// Size of the segment to add to each space, given the current capacity
    /// of one space and the block (header included) that failed to fit.
    ///
    /// The doubling target is cut back to just the block when it would
    /// pass `max_space_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if even the block alone would pass
    /// the cap, or on arithmetic overflow.
    pub fn segment_size(&self, capacity: usize, block_bytes: usize) -> GcResult<usize> {
        let oom = GcError::OutOfMemory {
            requested: block_bytes,
        };
        let factor = self.growth_factor.max(2) - 1;
        let needed = align_to_word(block_bytes.max(HEADER_SIZE)).ok_or(oom.clone())?;
        let target = align_to_word(capacity.saturating_mul(factor).max(needed)).ok_or(oom.clone())?;

        match self.max_space_bytes {
            None => Ok(target),
            Some(max) => {
                let room = max.saturating_sub(capacity);
                if target <= room {
                    Ok(target)
                } else if needed <= room {
                    Ok(needed)
                } else {
                    Err(oom)
                }
            }
        }
    }
}
