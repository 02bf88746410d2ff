//! Block headers.
//!
//! Every block in a heap space starts with a [`BlockHeader`] followed by
//! exactly `size` payload bytes:
//!
//! ```text
//! ┌─────────────────────────────────────────┐  ← block address
//! │ BlockHeader (4 words)                   │
//! │  - size: payload bytes (word multiple)  │
//! │  - flags: ALLOCATED / FREE              │
//! │  - next_free: free-list link            │
//! │  - forwarding: copy address during GC   │
//! ├─────────────────────────────────────────┤  ← payload address (handed out)
//! │ Payload (size bytes)                    │
//! └─────────────────────────────────────────┘
//! ```

use heap_types::Address;

/// Size in bytes of a block header.
pub const HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();

const FLAG_FREE: usize = 0x0;
const FLAG_ALLOCATED: usize = 0x1;

/// Allocation state recorded in a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockState {
    /// Handed out by the allocator and not released
    Allocated,
    /// Released and linked into the free list
    Free,
}

/// Metadata prefixing every block.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BlockHeader {
    /// Payload size in bytes
    size: usize,
    /// Allocation flag
    flags: usize,
    /// Next free-list member; only meaningful while FREE and linked
    next_free: Address,
    /// Payload address of the copy; only meaningful during a collection
    forwarding: Address,
}

impl BlockHeader {
    /// Creates an allocated header for a payload of `size` bytes.
    pub const fn allocated(size: usize) -> Self {
        BlockHeader {
            size,
            flags: FLAG_ALLOCATED,
            next_free: Address::NULL,
            forwarding: Address::NULL,
        }
    }

    /// Creates a free, unlinked header for a payload of `size` bytes.
    pub const fn free(size: usize) -> Self {
        BlockHeader {
            size,
            flags: FLAG_FREE,
            next_free: Address::NULL,
            forwarding: Address::NULL,
        }
    }

    /// Payload size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Returns the allocation state, or `None` if the flag word is not one
    /// the allocator writes.
    #[inline]
    pub fn state(&self) -> Option<BlockState> {
        match self.flags {
            FLAG_ALLOCATED => Some(BlockState::Allocated),
            FLAG_FREE => Some(BlockState::Free),
            _ => None,
        }
    }

    /// Returns true if the block is allocated.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.flags == FLAG_ALLOCATED
    }

    /// Returns true if the block is free.
    #[inline]
    pub fn is_free(&self) -> bool {
        self.flags == FLAG_FREE
    }

    #[inline]
    pub(crate) fn set_free(&mut self) {
        self.flags = FLAG_FREE;
    }

    #[inline]
    pub(crate) fn next_free(&self) -> Address {
        self.next_free
    }

    #[inline]
    pub(crate) fn set_next_free(&mut self, next: Address) {
        self.next_free = next;
    }

    /// Returns the forwarding address if this block has been copied.
    #[inline]
    pub fn forwarding(&self) -> Option<Address> {
        if self.forwarding.is_null() {
            None
        } else {
            Some(self.forwarding)
        }
    }

    #[inline]
    pub(crate) fn set_forwarding(&mut self, to: Address) {
        self.forwarding = to;
    }
}

/// Total bytes a block with a `size`-byte payload occupies.
#[inline]
pub const fn block_bytes(size: usize) -> usize {
    HEADER_SIZE + size
}

/// Payload address of the block whose header is at `block`.
#[inline]
pub const fn payload_of(block: Address) -> Address {
    block.add(HEADER_SIZE)
}

/// Header address of the block whose payload is at `payload`.
#[inline]
pub const fn header_of(payload: Address) -> Address {
    payload.sub(HEADER_SIZE)
}

/// Reinterprets `block` as a header.
///
/// # Safety
///
/// `block` must be word aligned and point at `HEADER_SIZE` bytes inside a
/// segment owned by a live heap space, and no other reference to that header
/// may be alive.
#[inline]
pub(crate) unsafe fn header_mut<'a>(block: Address) -> &'a mut BlockHeader {
    &mut *block.as_ptr::<BlockHeader>()
}

/// Shared variant of [`header_mut`].
///
/// # Safety
///
/// Same requirements as [`header_mut`], minus exclusivity.
#[inline]
pub(crate) unsafe fn header_ref<'a>(block: Address) -> &'a BlockHeader {
    &*block.as_ptr::<BlockHeader>()
}

/// Writes a fresh header at `block`.
///
/// # Safety
///
/// Same requirements as [`header_mut`].
#[inline]
pub(crate) unsafe fn write_header(block: Address, header: BlockHeader) {
    block.as_ptr::<BlockHeader>().write(header);
}
