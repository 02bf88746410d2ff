//! Heap spaces.
//!
//! A [`HeapSpace`] is one half of the semi-space pair. It is an address-ordered
//! list of [`Segment`]s; a fresh space has exactly one, and growth appends more
//! to both halves of the pair at once. Within a segment, every byte in
//! `[start, top)` is covered by exactly one block header followed by its
//! payload, so the segment can be walked by header arithmetic alone.
//!
//! Bump allocation happens in the *current* segment only; the allocator
//! decides when to move on to the next one.

use crate::header::{self, BlockHeader, BlockState, HEADER_SIZE};
use crate::source::{MemorySource, Region};
use heap_types::{align_to_word, Address, GcError, GcResult};

/// A contiguous piece of a heap space with its own bump cursor.
#[derive(Debug)]
pub struct Segment {
    region: Region,
    top: Address,
}

impl Segment {
    fn new(region: Region) -> Self {
        let top = region.start();
        Segment { region, top }
    }

    /// First address of the segment.
    #[inline]
    pub fn start(&self) -> Address {
        self.region.start()
    }

    /// One past the last usable address.
    #[inline]
    pub fn end(&self) -> Address {
        self.region.end()
    }

    /// Bump cursor; everything below it is covered by blocks.
    #[inline]
    pub fn top(&self) -> Address {
        self.top
    }

    /// Total bytes in the segment.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes covered by blocks.
    #[inline]
    pub fn used(&self) -> usize {
        self.top.offset_from(self.start())
    }

    /// Bytes between the cursor and the end.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.end().offset_from(self.top)
    }

    /// Returns true if `addr` lies in `[start, end)`.
    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start() && addr < self.end()
    }

    fn bump(&mut self, bytes: usize) -> Option<Address> {
        if bytes > self.remaining() {
            return None;
        }
        let block = self.top;
        self.top = self.top.add(bytes);
        Some(block)
    }

    fn reset(&mut self) {
        self.top = self.start();
    }
}

/// A block visited while walking a heap space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the block header
    pub header: Address,
    /// Address of the payload (the handle given to the mutator)
    pub payload: Address,
    /// Payload size in bytes
    pub size: usize,
    /// Allocation state, `None` if the flag word is corrupt
    pub state: Option<BlockState>,
    /// Index of the segment containing the block
    pub segment: usize,
}

/// One half of the semi-space pair.
#[derive(Debug)]
pub struct HeapSpace {
    segments: Vec<Segment>,
    current: usize,
}

impl HeapSpace {
    /// Creates a space able to hold at least one `requested_bytes` payload.
    ///
    /// The request is raised to `floor`, rounded to the word size, and grown
    /// by one header's worth before the memory source is asked for it.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if the size overflows or the source
    /// cannot supply the memory.
    pub fn create(
        source: &mut dyn MemorySource,
        requested_bytes: usize,
        floor: usize,
    ) -> GcResult<Self> {
        let bytes = space_bytes(requested_bytes, floor)?;
        let region = source.acquire(bytes)?;
        Ok(HeapSpace {
            segments: vec![Segment::new(region)],
            current: 0,
        })
    }

    /// Bump-allocates `bytes` from the current segment.
    ///
    /// Returns the address the cursor held before the call, or `None` when
    /// the current segment is exhausted. Never grows the space.
    pub fn bump_allocate(&mut self, bytes: usize) -> Option<Address> {
        self.segments[self.current].bump(bytes)
    }

    /// Returns true if there is a segment after the current one.
    pub fn has_next_segment(&self) -> bool {
        self.current + 1 < self.segments.len()
    }

    /// Makes the next segment current. Returns false if there is none.
    pub(crate) fn advance(&mut self) -> bool {
        if self.has_next_segment() {
            self.current += 1;
            true
        } else {
            false
        }
    }

    /// Covers the unused tail of segment `index` with a FREE block.
    ///
    /// Returns the header address of the new block, or `None` if the tail is
    /// too small to hold a header (it is then left past `top`).
    pub(crate) fn seal(&mut self, index: usize) -> Option<Address> {
        let segment = &mut self.segments[index];
        let tail = segment.remaining();
        if tail < HEADER_SIZE {
            return None;
        }
        let block = segment.top;
        segment.top = segment.end();
        // SAFETY: [block, end) is unused memory owned by this segment and is
        // at least one header long.
        unsafe { header::write_header(block, BlockHeader::free(tail - HEADER_SIZE)) };
        Some(block)
    }

    /// Seals every segment before the current one.
    pub(crate) fn seal_before_current(&mut self) -> Vec<Address> {
        (0..self.current).filter_map(|i| self.seal(i)).collect()
    }

    /// Inserts `region` as a new segment (kept in address order) and returns
    /// its index.
    pub(crate) fn add_segment(&mut self, region: Region) -> usize {
        let start = region.start();
        let index = self.segments.partition_point(|s| s.start() < start);
        self.segments.insert(index, Segment::new(region));
        if index <= self.current {
            // the current segment shifted right
            self.current += 1;
        }
        index
    }

    /// Makes segment `index` current.
    pub(crate) fn set_current(&mut self, index: usize) {
        debug_assert!(index < self.segments.len());
        self.current = index;
    }

    /// Sets the top of segment `index`; used when a collection fills this space.
    pub(crate) fn set_top(&mut self, index: usize, top: Address) {
        let segment = &mut self.segments[index];
        debug_assert!(top >= segment.start() && top <= segment.end());
        segment.top = top;
    }

    /// Logically discards all content.
    pub(crate) fn reset(&mut self) {
        for segment in &mut self.segments {
            segment.reset();
        }
        self.current = 0;
    }

    /// The segments of this space in address order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Index of the segment serving bump allocations.
    pub fn current_segment(&self) -> usize {
        self.current
    }

    /// Start of the first segment.
    pub fn start(&self) -> Address {
        self.segments[0].start()
    }

    /// First payload address a fresh space hands out.
    pub fn first_usable(&self) -> Address {
        header::payload_of(self.start())
    }

    /// Bump cursor of the current segment.
    pub fn cursor(&self) -> Address {
        self.segments[self.current].top()
    }

    /// End boundary of the current segment.
    pub fn end(&self) -> Address {
        self.segments[self.current].end()
    }

    /// Total bytes across all segments.
    pub fn capacity(&self) -> usize {
        self.segments.iter().map(Segment::capacity).sum()
    }

    /// Bytes covered by blocks across all segments.
    pub fn used(&self) -> usize {
        self.segments.iter().map(Segment::used).sum()
    }

    /// Index of the segment containing `addr`.
    pub fn segment_of(&self, addr: Address) -> Option<usize> {
        let index = self.segments.partition_point(|s| s.start() <= addr);
        if index == 0 {
            return None;
        }
        if self.segments[index - 1].contains(addr) {
            Some(index - 1)
        } else {
            None
        }
    }

    /// Returns true if `addr` lies inside any segment.
    pub fn contains(&self, addr: Address) -> bool {
        self.segment_of(addr).is_some()
    }

    /// Walks every block from the start of each segment up to its top.
    ///
    /// The walk trusts header sizes; a corrupt size ends the walk of that
    /// segment early instead of running past `top`.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            space: self,
            segment: 0,
            offset: self.segments.first().map(Segment::start),
        }
    }
}

/// Iterator over the blocks of a [`HeapSpace`].
pub struct Blocks<'a> {
    space: &'a HeapSpace,
    segment: usize,
    offset: Option<Address>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let segment = self.space.segments.get(self.segment)?;
            let at = self.offset.unwrap_or_else(|| segment.start());

            if at.add(HEADER_SIZE) <= segment.top() {
                // SAFETY: `at` is a block boundary below top, so a header
                // written by the allocator or collector lives there.
                let header = unsafe { header::header_ref(at) };
                let next = at.add(HEADER_SIZE).as_usize().checked_add(header.size());
                if let Some(next) = next.filter(|&n| n <= segment.top().as_usize()) {
                    self.offset = Some(Address::new(next));
                    return Some(BlockInfo {
                        header: at,
                        payload: header::payload_of(at),
                        size: header.size(),
                        state: header.state(),
                        segment: self.segment,
                    });
                }
            }

            self.segment += 1;
            self.offset = None;
        }
    }
}

/// Bytes to request for a space holding a `requested_bytes` payload.
pub(crate) fn space_bytes(requested_bytes: usize, floor: usize) -> GcResult<usize> {
    align_to_word(requested_bytes.max(floor))
        .and_then(|b| b.checked_add(HEADER_SIZE))
        .ok_or(GcError::OutOfMemory {
            requested: requested_bytes,
        })
}
