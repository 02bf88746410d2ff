//! Bulk memory sources.
//!
//! Heap spaces never allocate on their own; they ask a [`MemorySource`] for
//! word-aligned [`Region`]s. The default source is the global allocator.
//! [`BoundedMemory`] caps how much a heap may ever acquire, which is how
//! out-of-memory paths are exercised deterministically.

use heap_types::{Address, GcError, GcResult, WORD_SIZE};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ptr::NonNull;

/// A contiguous, word-aligned block of raw memory.
///
/// The region owns its memory and returns it to the global allocator on drop.
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    /// Allocates a zeroed region of `len` bytes from the global allocator.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if `len` is zero, does not form a
    /// valid layout, or the allocator refuses the request.
    pub fn allocate(len: usize) -> GcResult<Self> {
        if len == 0 {
            return Err(GcError::OutOfMemory { requested: 0 });
        }
        let layout = Layout::from_size_align(len, WORD_SIZE)
            .map_err(|_| GcError::OutOfMemory { requested: len })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(raw).ok_or(GcError::OutOfMemory { requested: len })?;

        Ok(Region { base, len })
    }

    /// First address of the region.
    #[inline]
    pub fn start(&self) -> Address {
        Address::from_ptr(self.base.as_ptr())
    }

    /// One past the last address of the region.
    #[inline]
    pub fn end(&self) -> Address {
        self.start().add(self.len)
    }

    /// Length of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; regions are never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // The layout was validated in `allocate`.
        if let Ok(layout) = Layout::from_size_align(self.len, WORD_SIZE) {
            // SAFETY: base was returned by alloc_zeroed with this same layout.
            unsafe { dealloc(self.base.as_ptr(), layout) };
        }
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("start", &self.start())
            .field("len", &self.len)
            .finish()
    }
}

/// Supplier of raw memory for heap spaces.
pub trait MemorySource {
    /// Acquires a region of at least `bytes` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if the source cannot supply it.
    fn acquire(&mut self, bytes: usize) -> GcResult<Region>;

    /// Acquires two regions of `bytes` bytes each, or neither.
    ///
    /// Growth needs one region per space. Sources that keep an account
    /// override this so a refused second region leaves the account as it
    /// was.
    fn acquire_pair(&mut self, bytes: usize) -> GcResult<(Region, Region)> {
        let first = self.acquire(bytes)?;
        let second = self.acquire(bytes)?;
        Ok((first, second))
    }
}

/// Memory source backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemorySource for SystemMemory {
    fn acquire(&mut self, bytes: usize) -> GcResult<Region> {
        Region::allocate(bytes)
    }
}

/// Memory source that refuses to hand out more than a fixed budget.
#[derive(Debug)]
pub struct BoundedMemory<S = SystemMemory> {
    inner: S,
    budget: usize,
    acquired: usize,
}

impl BoundedMemory<SystemMemory> {
    /// Creates a bounded source over the global allocator.
    pub fn new(budget: usize) -> Self {
        Self::wrap(SystemMemory, budget)
    }
}

impl<S: MemorySource> BoundedMemory<S> {
    /// Wraps another source with a budget of `budget` bytes.
    pub fn wrap(inner: S, budget: usize) -> Self {
        BoundedMemory {
            inner,
            budget,
            acquired: 0,
        }
    }

    /// Bytes handed out so far.
    pub fn acquired(&self) -> usize {
        self.acquired
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.budget - self.acquired
    }
}

impl<S: MemorySource> BoundedMemory<S> {
    fn check(&self, bytes: usize, total: Option<usize>) -> GcResult<()> {
        match total {
            Some(total) if total <= self.remaining() => Ok(()),
            _ => {
                log::debug!(
                    "memory budget refused {} bytes ({} of {} used)",
                    bytes,
                    self.acquired,
                    self.budget
                );
                Err(GcError::OutOfMemory { requested: bytes })
            }
        }
    }
}

impl<S: MemorySource> MemorySource for BoundedMemory<S> {
    fn acquire(&mut self, bytes: usize) -> GcResult<Region> {
        self.check(bytes, Some(bytes))?;
        let region = self.inner.acquire(bytes)?;
        self.acquired += region.len();
        Ok(region)
    }

    fn acquire_pair(&mut self, bytes: usize) -> GcResult<(Region, Region)> {
        self.check(bytes, bytes.checked_mul(2))?;
        let first = self.inner.acquire(bytes)?;
        let second = self.inner.acquire(bytes)?;
        self.acquired += first.len() + second.len();
        Ok((first, second))
    }
}
