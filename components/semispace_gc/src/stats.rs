//! Collector statistics.

use serde::Serialize;
use std::time::Duration;

/// Running totals kept by a heap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Completed collection cycles
    pub collections: usize,
    /// Segments appended to the pair
    pub growths: usize,
    /// Successful allocations
    pub allocations: usize,
    /// Successful releases
    pub releases: usize,
    /// Allocations served from the free list
    pub free_list_hits: usize,
    /// Objects moved to the reserve space, across all cycles
    pub objects_copied: usize,
    /// Bytes (headers included) moved to the reserve space
    pub bytes_copied: usize,
    /// Allocated objects left behind by a cycle
    pub objects_reclaimed: usize,
    /// Bytes (headers included) left behind by a cycle
    pub bytes_reclaimed: usize,
    /// Duration of the most recent cycle
    pub last_pause: Duration,
    /// Sum of all cycle durations
    pub total_pause: Duration,
}

impl GcStats {
    /// Mean cycle duration, or zero before the first cycle.
    pub fn average_pause(&self) -> Duration {
        match u32::try_from(self.collections) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_pause / n,
        }
    }
}

/// Point-in-time view of the active space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    /// Bytes in the active space (the reserve is the same size)
    pub capacity: usize,
    /// Bytes covered by blocks
    pub used: usize,
    /// Free-list members
    pub free_blocks: usize,
    /// Payload bytes on the free list
    pub free_bytes: usize,
    /// Segments per space
    pub segments: usize,
}
