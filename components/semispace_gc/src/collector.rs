//! Copying collection cycle.
//!
//! A cycle moves the live blocks of the active space into the (empty) reserve
//! space in five passes:
//!
//! 1. **Scan**: walk the active space block by block.
//! 2. **Mark**: decide liveness. Under [`Liveness::Reachability`] this is a
//!    worklist trace from the roots through the fields reported by the
//!    [`ObjectTracer`]; under [`Liveness::AllocatedFlag`] every ALLOCATED
//!    block is live. The reference fields of every live block are recorded
//!    and validated here.
//! 3. **Plan**: assign each live block its place in the reserve, in scan
//!    order. If the live set does not fit, the cycle stops before anything is
//!    written.
//! 4. **Copy**: duplicate header and payload, stamping the copy's payload
//!    address into the original's forwarding slot.
//! 5. **Fix up**: rewrite recorded fields inside the copies, then every root,
//!    through the forwarding slots.
//!
//! Swapping the spaces is left to the caller.

use crate::config::Liveness;
use crate::header::{self, BlockState};
use crate::space::{BlockInfo, HeapSpace};
use crate::trace::{self, ObjectTracer, RootSource};
use heap_types::{Address, GcError, GcResult, WORD_SIZE};
use std::collections::HashMap;
use std::ptr;
use std::slice;

/// Collector state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GcPhase {
    /// Mutator running
    #[default]
    Idle,
    /// A cycle is in progress
    Collecting,
}

/// Outcome of one successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Blocks copied into the reserve space
    pub objects_copied: usize,
    /// Bytes copied, headers included
    pub bytes_copied: usize,
    /// ALLOCATED blocks that were not copied
    pub objects_reclaimed: usize,
    /// Bytes of the active space that were not copied (free blocks included)
    pub bytes_reclaimed: usize,
    /// `(old payload, new payload)` for each copied block, in scan order
    pub relocations: Vec<(Address, Address)>,
}

/// A reference field found while marking: the block that holds it and its
/// byte offset in the payload.
struct Field {
    block: usize,
    offset: usize,
}

/// One cycle over a snapshot of the active space.
struct Cycle<'a> {
    active: &'a HeapSpace,
    blocks: Vec<BlockInfo>,
    /// payload address -> index into `blocks`
    index: HashMap<Address, usize>,
    live: Vec<bool>,
    fields: Vec<Field>,
}

impl<'a> Cycle<'a> {
    fn scan(active: &'a HeapSpace) -> GcResult<Self> {
        let blocks: Vec<BlockInfo> = active.blocks().collect();
        let mut index = HashMap::with_capacity(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            if block.state.is_none() {
                return Err(GcError::HeapCorrupted(format!(
                    "block {} has an unknown flag word",
                    block.header
                )));
            }
            index.insert(block.payload, i);
        }
        let live = vec![false; blocks.len()];
        Ok(Cycle {
            active,
            blocks,
            index,
            live,
            fields: Vec::new(),
        })
    }

    /// Maps a reference value to the block it names.
    ///
    /// Null and addresses outside the active space are not heap references.
    /// Anything else must be the payload address of an ALLOCATED block.
    fn resolve(&self, target: Address) -> GcResult<Option<usize>> {
        if target.is_null() || !self.active.contains(target) {
            return Ok(None);
        }
        match self.index.get(&target) {
            Some(&i) if self.blocks[i].state == Some(BlockState::Allocated) => Ok(Some(i)),
            _ => Err(GcError::DanglingReference { address: target }),
        }
    }

    /// Reads the forwarding slot of the block whose payload is `target`.
    ///
    /// Returns `None` for addresses that are not a scanned block's payload
    /// and for blocks that were not copied.
    fn forwarded(&self, target: Address) -> Option<Address> {
        if !self.index.contains_key(&target) {
            return None;
        }
        // SAFETY: `target` is the payload of a block found by the scan, so a
        // header written by the allocator or collector precedes it.
        unsafe { header::header_ref(header::header_of(target)).forwarding() }
    }

    fn payload(&self, i: usize) -> &[u8] {
        let block = &self.blocks[i];
        // SAFETY: the block was found by walking the active space, so its
        // payload is `size` initialized bytes inside a live segment.
        unsafe { slice::from_raw_parts(block.payload.as_ptr::<u8>(), block.size) }
    }

    /// Records the reference fields of block `i` and returns their values.
    fn record_fields(&mut self, i: usize, tracer: &dyn ObjectTracer) -> GcResult<Vec<Address>> {
        let mut offsets = Vec::new();
        tracer.trace(self.payload(i), &mut |offset| offsets.push(offset));

        let payload = self.payload(i);
        let mut values = Vec::with_capacity(offsets.len());
        for &offset in &offsets {
            let word = match trace::read_word(payload, offset) {
                Some(word) if offset % WORD_SIZE == 0 => word,
                _ => {
                    return Err(GcError::InvalidReferenceField {
                        offset,
                        size: payload.len(),
                    })
                }
            };
            values.push(Address::new(word));
        }
        self.fields
            .extend(offsets.into_iter().map(|offset| Field { block: i, offset }));
        Ok(values)
    }

    fn mark(
        &mut self,
        tracer: &dyn ObjectTracer,
        roots: &mut dyn RootSource,
        liveness: Liveness,
    ) -> GcResult<()> {
        match liveness {
            Liveness::Reachability => {
                let mut root_values = Vec::new();
                roots.visit_roots(&mut |slot| root_values.push(*slot));

                let mut worklist = Vec::new();
                for root in root_values {
                    if let Some(i) = self.resolve(root)? {
                        if !self.live[i] {
                            self.live[i] = true;
                            worklist.push(i);
                        }
                    }
                }

                while let Some(i) = worklist.pop() {
                    for target in self.record_fields(i, tracer)? {
                        if let Some(j) = self.resolve(target)? {
                            if !self.live[j] {
                                self.live[j] = true;
                                worklist.push(j);
                            }
                        }
                    }
                }
            }
            Liveness::AllocatedFlag => {
                for i in 0..self.blocks.len() {
                    if self.blocks[i].state == Some(BlockState::Allocated) {
                        self.live[i] = true;
                        self.record_fields(i, tracer)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Assigns reserve header addresses to live blocks in scan order.
    ///
    /// Returns the destinations and the final top of each reserve segment.
    fn plan(&self, reserve: &HeapSpace) -> GcResult<(Vec<Option<Address>>, Vec<Address>)> {
        let live_bytes: usize = self
            .blocks
            .iter()
            .zip(&self.live)
            .filter(|&(_, &live)| live)
            .map(|(block, _)| header::block_bytes(block.size))
            .sum();
        let overflow = || GcError::ReserveOverflow {
            live_bytes,
            reserve_capacity: reserve.capacity(),
        };

        let segments = reserve.segments();
        let mut tops: Vec<Address> = segments.iter().map(|s| s.start()).collect();
        let mut current = 0;
        let mut destinations = vec![None; self.blocks.len()];

        for (i, block) in self.blocks.iter().enumerate() {
            if !self.live[i] {
                continue;
            }
            let bytes = header::block_bytes(block.size);
            loop {
                let segment = segments.get(current).ok_or_else(overflow)?;
                if bytes <= segment.end().offset_from(tops[current]) {
                    break;
                }
                current += 1;
            }
            destinations[i] = Some(tops[current]);
            tops[current] = tops[current].add(bytes);
        }
        Ok((destinations, tops))
    }
}

/// Runs one cycle, filling `reserve` with the live blocks of `active`.
///
/// `reserve` must be freshly reset. On error nothing has been written to
/// either space and no root has been touched.
pub(crate) fn run_cycle(
    active: &HeapSpace,
    reserve: &mut HeapSpace,
    tracer: &dyn ObjectTracer,
    roots: &mut dyn RootSource,
    liveness: Liveness,
) -> GcResult<CollectionReport> {
    let mut cycle = Cycle::scan(active)?;
    cycle.mark(tracer, roots, liveness)?;
    let (destinations, tops) = cycle.plan(reserve)?;

    let mut report = CollectionReport::default();

    for (i, block) in cycle.blocks.iter().enumerate() {
        let dest = match destinations[i] {
            Some(dest) => dest,
            None => {
                if block.state == Some(BlockState::Allocated) {
                    report.objects_reclaimed += 1;
                }
                continue;
            }
        };
        let bytes = header::block_bytes(block.size);
        let new_payload = header::payload_of(dest);
        // SAFETY: `dest` was planned inside a reserve segment with room for
        // `bytes`, and reserve and active never share memory.
        unsafe {
            ptr::copy_nonoverlapping(block.header.as_ptr::<u8>(), dest.as_ptr::<u8>(), bytes);
            let copy = header::header_mut(dest);
            copy.set_forwarding(Address::NULL);
            copy.set_next_free(Address::NULL);
            header::header_mut(block.header).set_forwarding(new_payload);
        }
        log::trace!("relocated {} -> {} ({} bytes)", block.payload, new_payload, bytes);

        report.objects_copied += 1;
        report.bytes_copied += bytes;
        report.relocations.push((block.payload, new_payload));
    }

    let mut last_used = 0;
    for (index, &top) in tops.iter().enumerate() {
        reserve.set_top(index, top);
        if top > reserve.segments()[index].start() {
            last_used = index;
        }
    }
    reserve.set_current(last_used);

    // Interior fields, read from and written to the copies.
    for field in &cycle.fields {
        let copy = match destinations[field.block] {
            Some(dest) => header::payload_of(dest),
            None => continue,
        };
        let slot = copy.add(field.offset);
        // SAFETY: the offset was validated against the payload size while
        // marking, and the copy has the same size.
        let value = unsafe { ptr::read(slot.as_ptr::<usize>()) };
        let target = Address::new(value);
        if target.is_null() || !active.contains(target) {
            continue;
        }
        match cycle.forwarded(target) {
            // SAFETY: as above.
            Some(new) => unsafe { ptr::write(slot.as_ptr::<usize>(), new.as_usize()) },
            None => log::warn!(
                "field at {} refers to {}, which did not survive the cycle",
                slot,
                target
            ),
        }
    }

    roots.visit_roots(&mut |slot| {
        if slot.is_null() || !active.contains(*slot) {
            return;
        }
        match cycle.forwarded(*slot) {
            Some(new) => *slot = new,
            None => log::warn!("root {} did not survive the cycle", slot),
        }
    });

    report.bytes_reclaimed = active.used() - report.bytes_copied;
    Ok(report)
}
