//! The heap manager.
//!
//! A [`Heap`] owns the semi-space pair, the free list, the root table and
//! the collaborators. Every operation goes through it; there is no global
//! state, so several heaps can coexist.
//!
//! # Example
//!
//! ```
//! use semispace_gc::Heap;
//!
//! let mut heap = Heap::new(1024).unwrap();
//! let obj = heap.allocate(9).unwrap().unwrap();
//! assert_eq!(obj, heap.first_usable());
//!
//! let root = heap.add_root(obj);
//! heap.collect().unwrap();
//! assert!(heap.is_live_block(heap.root(root).unwrap()));
//! ```

use crate::collector::{self, CollectionReport, GcPhase};
use crate::config::HeapConfig;
use crate::free_list::FreeList;
use crate::header::{self, BlockHeader, BlockState, HEADER_SIZE};
use crate::policy::Strategy;
use crate::source::{MemorySource, SystemMemory};
use crate::space::{BlockInfo, HeapSpace};
use crate::stats::{GcStats, HeapStats};
use crate::trace::{self, NoReferences, ObjectTracer, RootHandle, RootScope, RootSet, RootSource};
use heap_types::{align_to_word, Address, GcError, GcResult, WORD_SIZE};
use std::collections::BTreeSet;
use std::mem;
use std::ptr;
use std::slice;
use std::time::Instant;

/// Builder for [`Heap`] with custom collaborators.
pub struct HeapBuilder {
    config: HeapConfig,
    source: Box<dyn MemorySource>,
    tracer: Box<dyn ObjectTracer>,
}

impl Default for HeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapBuilder {
    /// Starts from the default configuration, system memory and leaf objects.
    pub fn new() -> Self {
        HeapBuilder {
            config: HeapConfig::default(),
            source: Box::new(SystemMemory),
            tracer: Box::new(NoReferences),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: HeapConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the requested size of each space.
    pub fn with_space_bytes(mut self, bytes: usize) -> Self {
        self.config.initial_space_bytes = bytes;
        self
    }

    /// Replaces the bulk memory source.
    pub fn with_memory_source(mut self, source: impl MemorySource + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Replaces the object tracer.
    pub fn with_tracer(mut self, tracer: impl ObjectTracer + 'static) -> Self {
        self.tracer = Box::new(tracer);
        self
    }

    /// Acquires both spaces and builds the heap.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if the memory source cannot supply
    /// the pair.
    pub fn build(self) -> GcResult<Heap> {
        let HeapBuilder {
            config,
            mut source,
            tracer,
        } = self;
        let active = HeapSpace::create(
            source.as_mut(),
            config.initial_space_bytes,
            config.min_space_bytes,
        )?;
        let reserve = HeapSpace::create(
            source.as_mut(),
            config.initial_space_bytes,
            config.min_space_bytes,
        )?;
        log::debug!(
            "heap initialized: two spaces of {} bytes at {} and {}",
            active.capacity(),
            active.start(),
            reserve.start()
        );

        Ok(Heap {
            config,
            active,
            reserve,
            free_list: FreeList::new(),
            roots: RootSet::new(),
            root_sources: Vec::new(),
            source,
            tracer,
            phase: GcPhase::Idle,
            stats: GcStats::default(),
            last_report: None,
        })
    }
}

/// A semi-space heap with a coalescing free-list allocator.
pub struct Heap {
    config: HeapConfig,
    active: HeapSpace,
    reserve: HeapSpace,
    free_list: FreeList,
    roots: RootSet,
    root_sources: Vec<Box<dyn RootSource>>,
    source: Box<dyn MemorySource>,
    tracer: Box<dyn ObjectTracer>,
    phase: GcPhase,
    stats: GcStats,
    last_report: Option<CollectionReport>,
}

impl Heap {
    /// Creates a heap with default settings and spaces of at least
    /// `requested_bytes`.
    pub fn new(requested_bytes: usize) -> GcResult<Self> {
        HeapBuilder::new().with_space_bytes(requested_bytes).build()
    }

    /// Creates a heap from a configuration, with system memory and leaf
    /// objects.
    pub fn with_config(config: HeapConfig) -> GcResult<Self> {
        HeapBuilder::new().with_config(config).build()
    }

    /// Returns a builder.
    pub fn builder() -> HeapBuilder {
        HeapBuilder::new()
    }

    // ---- allocation ----

    /// Allocates a zeroed payload of at least `size` bytes.
    ///
    /// Returns `Ok(None)` for a zero-sized request. The size is rounded up
    /// to the word size. The free list is tried first, then the bump cursor,
    /// then the growth policy's strategies in order.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] when every strategy failed, or any
    /// fatal error raised by a collection on the way.
    pub fn allocate(&mut self, size: usize) -> GcResult<Option<Address>> {
        if size == 0 {
            return Ok(None);
        }
        let oom = GcError::OutOfMemory { requested: size };
        let aligned = align_to_word(size).ok_or(oom.clone())?;
        let bytes = aligned.checked_add(HEADER_SIZE).ok_or(oom.clone())?;

        if let Some(payload) = self.try_allocate(aligned, bytes)? {
            return Ok(Some(payload));
        }

        for strategy in self.config.growth.strategies() {
            match strategy {
                Strategy::Collect => match self.run_collection(None) {
                    Ok(()) => {}
                    Err(err) if !err.is_fatal() => {
                        log::debug!("collection on exhaustion failed: {}", err);
                    }
                    Err(err) => return Err(err),
                },
                Strategy::Grow => self.grow(bytes)?,
            }
            if let Some(payload) = self.try_allocate(aligned, bytes)? {
                return Ok(Some(payload));
            }
        }

        log::error!("allocation of {} bytes failed: heap exhausted", size);
        Err(oom)
    }

    fn try_allocate(&mut self, size: usize, bytes: usize) -> GcResult<Option<Address>> {
        // SAFETY: every free-list member is a FREE block in the active space.
        if let Some(block) = unsafe { self.free_list.take_first_fit(size) } {
            self.stats.free_list_hits += 1;
            // SAFETY: `block` was just unlinked and its header is intact.
            let found = unsafe { header::header_ref(block).size() };
            return Ok(Some(self.stamp(block, found)));
        }

        loop {
            if let Some(block) = self.active.bump_allocate(bytes) {
                return Ok(Some(self.stamp(block, size)));
            }
            if !self.active.has_next_segment() {
                return Ok(None);
            }
            let current = self.active.current_segment();
            if let Some(tail) = self.active.seal(current) {
                // SAFETY: `tail` was just stamped FREE and is not linked.
                unsafe { self.free_list.insert(&self.active, tail)? };
            }
            self.active.advance();
        }
    }

    /// Writes an ALLOCATED header at `block` and zeroes the payload.
    fn stamp(&mut self, block: Address, size: usize) -> Address {
        let payload = header::payload_of(block);
        // SAFETY: `block` heads `HEADER_SIZE + size` bytes owned by the
        // active space and handed to nobody else.
        unsafe {
            header::write_header(block, BlockHeader::allocated(size));
            ptr::write_bytes(payload.as_ptr::<u8>(), 0, size);
        }
        self.stats.allocations += 1;
        payload
    }

    /// Releases an allocation back to the free list.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::InvalidRelease`] if `payload` is not the handle of
    /// a block in the active space, and [`GcError::DoubleFree`] if the block
    /// is already free.
    pub fn release(&mut self, payload: Address) -> GcResult<()> {
        let block = self.block_at(payload)?;
        // SAFETY: `block_at` checked the header lies inside a segment.
        let state = unsafe { header::header_ref(block).state() };
        match state {
            Some(BlockState::Allocated) => {}
            Some(BlockState::Free) => return Err(GcError::DoubleFree { address: payload }),
            None => return Err(GcError::InvalidRelease { address: payload }),
        }
        // SAFETY: the block is ALLOCATED, so it is not a free-list member.
        unsafe { self.free_list.insert(&self.active, block)? };
        self.stats.releases += 1;
        Ok(())
    }

    /// Finds the header for `payload` and checks it plausibly heads a block.
    fn block_at(&self, payload: Address) -> GcResult<Address> {
        let invalid = GcError::InvalidRelease { address: payload };
        if payload.is_null() || !payload.is_word_aligned() {
            return Err(invalid);
        }
        let index = self.active.segment_of(payload).ok_or(invalid.clone())?;
        let segment = &self.active.segments()[index];
        if payload.as_usize() < segment.start().as_usize() + HEADER_SIZE {
            return Err(invalid);
        }
        let block = header::header_of(payload);
        // SAFETY: the header lies between segment start and payload.
        let size = unsafe { header::header_ref(block).size() };
        match payload.as_usize().checked_add(size) {
            Some(end) if end <= segment.top().as_usize() && size % WORD_SIZE == 0 => {
                Ok(block)
            }
            _ => Err(invalid),
        }
    }

    // ---- collection ----

    /// Runs a collection cycle with the heap's own roots.
    ///
    /// If the live set does not pack into the reserve and the policy allows
    /// growth, both spaces are grown and the cycle is retried once.
    ///
    /// # Errors
    ///
    /// On any error the heap is left exactly as it was.
    pub fn collect(&mut self) -> GcResult<()> {
        self.collect_or_grow(None)
    }

    /// Runs a collection cycle with `extra` visited as additional roots.
    pub fn collect_with(&mut self, extra: &mut dyn RootSource) -> GcResult<()> {
        self.collect_or_grow(Some(extra))
    }

    fn collect_or_grow<'x>(
        &mut self,
        mut extra: Option<&mut (dyn RootSource + 'x)>,
    ) -> GcResult<()> {
        match self.run_collection(extra.as_deref_mut()) {
            Err(GcError::ReserveOverflow { live_bytes, .. }) if self.config.growth.allow_growth => {
                log::debug!(
                    "{} live bytes do not pack into the reserve, growing first",
                    live_bytes
                );
                self.grow(live_bytes)?;
                self.run_collection(extra)
            }
            other => other,
        }
    }

    fn run_collection<'x>(&mut self, extra: Option<&mut (dyn RootSource + 'x)>) -> GcResult<()> {
        let started = Instant::now();
        let used_before = self.active.used();
        log::debug!(
            "collection #{} starting: {} bytes in use",
            self.stats.collections + 1,
            used_before
        );

        self.phase = GcPhase::Collecting;
        let mut scope = RootScope {
            table: &mut self.roots,
            sources: &mut self.root_sources,
            extra,
        };
        let result = collector::run_cycle(
            &self.active,
            &mut self.reserve,
            self.tracer.as_ref(),
            &mut scope,
            self.config.liveness,
        );
        self.phase = GcPhase::Idle;

        let report = match result {
            Ok(report) => report,
            Err(err) => {
                if err.is_fatal() {
                    log::error!("collection failed: {}", err);
                } else {
                    log::debug!("collection abandoned: {}", err);
                }
                return Err(err);
            }
        };

        mem::swap(&mut self.active, &mut self.reserve);
        self.reserve.reset();
        self.free_list.clear();
        for tail in self.active.seal_before_current() {
            // SAFETY: each tail was just stamped FREE in the new active space.
            unsafe { self.free_list.insert(&self.active, tail)? };
        }

        let pause = started.elapsed();
        self.stats.collections += 1;
        self.stats.objects_copied += report.objects_copied;
        self.stats.bytes_copied += report.bytes_copied;
        self.stats.objects_reclaimed += report.objects_reclaimed;
        self.stats.bytes_reclaimed += report.bytes_reclaimed;
        self.stats.last_pause = pause;
        self.stats.total_pause += pause;
        log::debug!(
            "collection #{} done in {:?}: {} objects ({} bytes) live, {} objects ({} bytes) reclaimed",
            self.stats.collections,
            pause,
            report.objects_copied,
            report.bytes_copied,
            report.objects_reclaimed,
            report.bytes_reclaimed
        );
        self.last_report = Some(report);

        if self.config.verify_collections {
            self.verify()?;
        }
        Ok(())
    }

    /// Report of the most recent successful cycle.
    pub fn last_collection(&self) -> Option<&CollectionReport> {
        self.last_report.as_ref()
    }

    /// Current collector phase.
    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    // ---- growth ----

    /// Appends a segment to both spaces, large enough for a block of
    /// `block_bytes` (header included).
    ///
    /// Existing blocks do not move. The unused tail of the current segment is
    /// released into the free list and the new segment becomes current.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] if the policy caps growth or the
    /// source refuses. The heap is unchanged in that case.
    pub fn grow(&mut self, block_bytes: usize) -> GcResult<()> {
        let capacity = self.active.capacity();
        let bytes = match self.config.growth.segment_size(capacity, block_bytes) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("growth refused by policy at {} bytes: {}", capacity, err);
                return Err(err);
            }
        };
        let (for_active, for_reserve) = self.source.acquire_pair(bytes)?;

        let current = self.active.current_segment();
        if let Some(tail) = self.active.seal(current) {
            // SAFETY: `tail` was just stamped FREE and is not linked.
            unsafe { self.free_list.insert(&self.active, tail)? };
        }
        let index = self.active.add_segment(for_active);
        self.active.set_current(index);
        self.reserve.add_segment(for_reserve);

        self.stats.growths += 1;
        log::debug!(
            "heap grown by {} bytes per space to {} ({} segments)",
            bytes,
            self.active.capacity(),
            self.active.segments().len()
        );
        Ok(())
    }

    // ---- roots ----

    /// Registers `addr` as a root and returns its handle.
    pub fn add_root(&mut self, addr: Address) -> RootHandle {
        self.roots.add(addr)
    }

    /// Current value of a root. Collections rewrite it in place.
    pub fn root(&self, handle: RootHandle) -> Option<Address> {
        self.roots.get(handle)
    }

    /// Overwrites a root. Returns false if the handle was removed.
    pub fn set_root(&mut self, handle: RootHandle, addr: Address) -> bool {
        self.roots.set(handle, addr)
    }

    /// Removes a root, returning its last value.
    pub fn remove_root(&mut self, handle: RootHandle) -> Option<Address> {
        self.roots.remove(handle)
    }

    /// The heap's root table.
    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    /// Adds a root source visited on every cycle.
    pub fn register_root_source(&mut self, source: Box<dyn RootSource>) {
        self.root_sources.push(source);
    }

    // ---- object access ----

    /// Payload bytes of an allocated block.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::InvalidRelease`] if `payload` is not the handle of
    /// an allocated block.
    pub fn payload(&self, payload: Address) -> GcResult<&[u8]> {
        let size = self.allocated_size(payload)?;
        // SAFETY: the block is allocated and its payload lies below top.
        Ok(unsafe { slice::from_raw_parts(payload.as_ptr::<u8>(), size) })
    }

    /// Mutable payload bytes of an allocated block.
    pub fn payload_mut(&mut self, payload: Address) -> GcResult<&mut [u8]> {
        let size = self.allocated_size(payload)?;
        // SAFETY: as above; `&mut self` keeps the heap from moving it.
        Ok(unsafe { slice::from_raw_parts_mut(payload.as_ptr::<u8>(), size) })
    }

    fn allocated_size(&self, payload: Address) -> GcResult<usize> {
        let block = self.block_at(payload)?;
        // SAFETY: `block_at` checked the header lies inside a segment.
        let header = unsafe { header::header_ref(block) };
        if header.is_allocated() {
            Ok(header.size())
        } else {
            Err(GcError::InvalidRelease { address: payload })
        }
    }

    /// Reads the word at `offset` in an object's payload as an address.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::InvalidReferenceField`] if the word does not fit
    /// in the payload or is misaligned.
    pub fn read_word(&self, payload: Address, offset: usize) -> GcResult<Address> {
        let bytes = self.payload(payload)?;
        match trace::read_word(bytes, offset) {
            Some(word) if offset % WORD_SIZE == 0 => Ok(Address::new(word)),
            _ => Err(GcError::InvalidReferenceField {
                offset,
                size: bytes.len(),
            }),
        }
    }

    /// Writes `value` into the word at `offset` in an object's payload.
    pub fn write_word(&mut self, payload: Address, offset: usize, value: Address) -> GcResult<()> {
        let bytes = self.payload_mut(payload)?;
        let size = bytes.len();
        if offset % WORD_SIZE == 0 && trace::write_word(bytes, offset, value.as_usize())
        {
            Ok(())
        } else {
            Err(GcError::InvalidReferenceField { offset, size })
        }
    }

    // ---- inspection ----

    /// Walks the active space.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.active.blocks()
    }

    /// Free-list members as `(header address, payload size)`, starting at
    /// the root.
    pub fn free_blocks(&self) -> Vec<(Address, usize)> {
        self.free_list
            .iter()
            // SAFETY: members are FREE headers in the active space.
            .map(|block| (block, unsafe { header::header_ref(block).size() }))
            .collect()
    }

    /// Bump cursor of the active space.
    pub fn cursor(&self) -> Address {
        self.active.cursor()
    }

    /// Payload address of the first block of a fresh active space.
    pub fn first_usable(&self) -> Address {
        self.active.first_usable()
    }

    /// End boundary of the active bump segment.
    pub fn end(&self) -> Address {
        self.active.end()
    }

    /// The active space.
    pub fn active_space(&self) -> &HeapSpace {
        &self.active
    }

    /// The reserve space.
    pub fn reserve_space(&self) -> &HeapSpace {
        &self.reserve
    }

    /// Returns true if `addr` lies in the active space.
    pub fn contains(&self, addr: Address) -> bool {
        self.active.contains(addr)
    }

    /// Returns true if `addr` is the payload of an ALLOCATED block.
    pub fn is_live_block(&self, addr: Address) -> bool {
        self.contains(addr)
            && self
                .active
                .blocks()
                .any(|b| b.payload == addr && b.state == Some(BlockState::Allocated))
    }

    /// Running totals.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Snapshot of the active space.
    pub fn heap_stats(&self) -> HeapStats {
        HeapStats {
            capacity: self.active.capacity(),
            used: self.active.used(),
            free_blocks: self.free_list.len(),
            free_bytes: self.free_blocks().iter().map(|&(_, size)| size).sum(),
            segments: self.active.segments().len(),
        }
    }

    /// The configuration the heap was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    // ---- integrity ----

    /// Checks the structural invariants of the active space and free list.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::HeapCorrupted`] describing the first violation.
    pub fn verify(&self) -> GcResult<()> {
        let corrupt = |msg: String| {
            log::error!("heap verification failed: {}", msg);
            Err(GcError::HeapCorrupted(msg))
        };

        let mut free_blocks = BTreeSet::new();
        for (index, segment) in self.active.segments().iter().enumerate() {
            let top = segment.top();
            let mut at = segment.start();
            while at < top {
                if at.add(HEADER_SIZE) > top {
                    return corrupt(format!("segment {} has a partial header at {}", index, at));
                }
                // SAFETY: `at` is a block boundary below top.
                let header = unsafe { header::header_ref(at) };
                match header.state() {
                    Some(BlockState::Free) => {
                        free_blocks.insert(at);
                    }
                    Some(BlockState::Allocated) => {}
                    None => return corrupt(format!("block {} has an unknown flag word", at)),
                }
                match at.as_usize().checked_add(HEADER_SIZE + header.size()) {
                    Some(next) if next <= top.as_usize() => at = Address::new(next),
                    _ => {
                        return corrupt(format!(
                            "block {} of {} bytes overruns segment {} top {}",
                            at,
                            header.size(),
                            index,
                            top
                        ))
                    }
                }
            }
        }

        let members: Vec<Address> = self.free_list.iter().collect();
        if members.len() != self.free_list.len() {
            return corrupt(format!(
                "free list ring has {} members, expected {}",
                members.len(),
                self.free_list.len()
            ));
        }
        if let Some(stray) = members.iter().find(|m| !free_blocks.contains(m)) {
            return corrupt(format!("free list member {} is not a FREE block", stray));
        }

        let mut descents = 0;
        for (i, &member) in members.iter().enumerate() {
            let next = members[(i + 1) % members.len()];
            // SAFETY: every member is a FREE block found by the walk.
            let header = unsafe { header::header_ref(member) };
            if header.next_free() != next {
                return corrupt(format!("free list link broken after {}", member));
            }
            if members.len() == 1 {
                continue;
            }
            if next < member {
                descents += 1;
            }
            let end = member.add(HEADER_SIZE + header.size());
            if end == next && self.active.segment_of(member) == self.active.segment_of(next) {
                return corrupt(format!("free blocks {} and {} are adjacent", member, next));
            }
        }
        if descents > 1 {
            return corrupt("free list is not address ordered".to_string());
        }
        if free_blocks.len() != members.len() {
            return corrupt(format!(
                "{} FREE blocks but {} free list members",
                free_blocks.len(),
                members.len()
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .field("active", &self.active)
            .field("free_blocks", &self.free_list.len())
            .field("roots", &self.roots.len())
            .field("phase", &self.phase)
            .finish()
    }
}
