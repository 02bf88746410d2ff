//! Semi-space copying garbage collector
//!
//! This component provides:
//! - Two equal-sized heap spaces (active and reserve) with bump allocation
//! - Explicit release into an address-ordered, coalescing free list
//! - A copying collection cycle driven by reachability from a root set,
//!   with forwarding addresses and reference fix-up
//! - A growth policy that collects first and then enlarges both spaces
//! - Integrity verification and statistics
//!
//! The collector knows nothing about object layouts. Hosts describe their
//! objects through an [`ObjectTracer`] and their roots through the heap's
//! [`RootSet`] or their own [`RootSource`]s.
//!
//! # Example
//!
//! ```
//! use semispace_gc::{Heap, PrefixedReferences};
//!
//! let mut heap = Heap::builder()
//!     .with_space_bytes(4096)
//!     .with_tracer(PrefixedReferences)
//!     .build()
//!     .unwrap();
//!
//! let size = PrefixedReferences::payload_size(1, 0);
//! let parent = heap.allocate(size).unwrap().unwrap();
//! let child = heap.allocate(size).unwrap().unwrap();
//! heap.write_word(parent, 0, 1usize.into()).unwrap();
//! heap.write_word(parent, PrefixedReferences::field_offset(0), child).unwrap();
//!
//! let root = heap.add_root(parent);
//! heap.collect().unwrap();
//!
//! let parent = heap.root(root).unwrap();
//! let child = heap.read_word(parent, PrefixedReferences::field_offset(0)).unwrap();
//! assert!(heap.is_live_block(child));
//! ```

pub mod collector;
pub mod config;
pub mod free_list;
pub mod header;
pub mod heap;
pub mod policy;
pub mod source;
pub mod space;
pub mod stats;
pub mod trace;

pub use collector::{CollectionReport, GcPhase};
pub use config::{HeapConfig, Liveness};
pub use header::{BlockHeader, BlockState, HEADER_SIZE};
pub use heap::{Heap, HeapBuilder};
pub use policy::{GrowthPolicy, Strategy};
pub use source::{BoundedMemory, MemorySource, Region, SystemMemory};
pub use space::{BlockInfo, HeapSpace, Segment};
pub use stats::{GcStats, HeapStats};
pub use trace::{NoReferences, ObjectTracer, PrefixedReferences, RootHandle, RootSet, RootSource};

pub use heap_types::{Address, GcError, GcResult, WORD_SIZE};
