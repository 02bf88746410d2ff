//! Leaf types shared by the heap, allocator and collector.
//!
//! This crate provides the vocabulary the rest of the workspace speaks:
//!
//! - [`Address`] - A raw machine address inside (or outside) a managed heap
//! - [`WORD_SIZE`] and [`align_to_word`] - Platform word alignment helpers
//! - [`GcError`] / [`GcResult`] - Errors surfaced by the memory manager
//!
//! # Examples
//!
//! ```
//! use heap_types::{align_to_word, Address, WORD_SIZE};
//!
//! let base = Address::new(0x1000);
//! assert_eq!(base.add(WORD_SIZE).as_usize(), 0x1000 + WORD_SIZE);
//! assert_eq!(align_to_word(9).unwrap() % WORD_SIZE, 0);
//! assert!(align_to_word(9).unwrap() >= 9);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod address;
mod error;

pub use address::{align_to_word, align_up, Address, WORD_SIZE};
pub use error::{GcError, GcResult};
