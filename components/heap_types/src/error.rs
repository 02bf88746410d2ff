//! Errors raised by the memory manager.
//!
//! Invalid allocation sizes are not errors (allocation returns no address) and
//! space exhaustion is handled internally by the growth policy. What remains
//! here is everything that escapes that boundary.

use crate::Address;
use thiserror::Error;

/// Error surfaced by heap, allocator or collector operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    /// The bulk memory source could not supply a segment.
    #[error("out of memory: could not acquire {requested} bytes")]
    OutOfMemory {
        /// Bytes that were asked of the memory source
        requested: usize,
    },

    /// The live set does not fit into the reserve space.
    #[error("reserve space overflow: {live_bytes} live bytes, reserve holds {reserve_capacity}")]
    ReserveOverflow {
        /// Bytes (headers included) the collection needed to copy
        live_bytes: usize,
        /// Total bytes available in the reserve space
        reserve_capacity: usize,
    },

    /// `release` was handed an address that is not an allocation handle.
    #[error("invalid release of {address}: not a block in the active space")]
    InvalidRelease {
        /// The offending address
        address: Address,
    },

    /// `release` was handed a block that is already free.
    #[error("double free of {address}")]
    DoubleFree {
        /// The offending address
        address: Address,
    },

    /// A root or reference field points into the heap but not at a live block.
    #[error("dangling reference to {address}")]
    DanglingReference {
        /// The referenced address
        address: Address,
    },

    /// The object tracer reported a field outside the payload or off word alignment.
    #[error("invalid reference field at offset {offset} in a {size}-byte payload")]
    InvalidReferenceField {
        /// Byte offset reported by the tracer
        offset: usize,
        /// Payload size of the traced object
        size: usize,
    },

    /// Integrity verification found a broken heap invariant.
    #[error("heap corrupted: {0}")]
    HeapCorrupted(String),
}

impl GcError {
    /// Returns true if the error must abort the operation that raised it.
    ///
    /// Only a reserve overflow can be recovered from, by growing the heap.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GcError::ReserveOverflow { .. })
    }

    /// Returns true for detected caller contract violations.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            GcError::InvalidRelease { .. }
                | GcError::DoubleFree { .. }
                | GcError::DanglingReference { .. }
                | GcError::InvalidReferenceField { .. }
        )
    }
}

/// Result type for memory manager operations.
pub type GcResult<T> = Result<T, GcError>;
