//! Address-ordered, circular free list with coalescing.
//!
//! Free blocks are linked through the `next_free` slot of their headers. The
//! list is circular and sorted by address, with a single wrap-around point
//! from the highest to the lowest free block. Releasing a block merges it
//! with a physically adjacent neighbor on either side, so no two members are
//! ever adjacent in memory.
//!
//! Blocks in different segments are never merged, even if the segments
//! happen to sit back to back in memory.

use crate::header::{self, HEADER_SIZE};
use crate::space::HeapSpace;
use heap_types::{Address, GcError, GcResult};

/// Returns true if `target` falls strictly between `lower` and its successor
/// `upper` in the circular order.
///
/// When `lower >= upper` the pair straddles the wrap-around point, and any
/// address above the highest or below the lowest member belongs there.
#[inline]
fn brackets(lower: Address, upper: Address, target: Address) -> bool {
    if lower < upper {
        lower < target && target < upper
    } else {
        target > lower || target < upper
    }
}

/// Returns true if the block at `upper` starts exactly where the block at
/// `lower` ends, inside the same segment.
///
/// # Safety
///
/// `lower` must be a valid block header in `space`.
unsafe fn adjacent(space: &HeapSpace, lower: Address, upper: Address) -> bool {
    let end = lower.add(HEADER_SIZE + header::header_ref(lower).size());
    end == upper && space.segment_of(lower) == space.segment_of(upper)
}

/// Circular singly-linked list of FREE blocks.
#[derive(Debug, Default)]
pub struct FreeList {
    /// Member the next search starts after
    root: Option<Address>,
    len: usize,
}

impl FreeList {
    /// Creates an empty free list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if there are no free blocks.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Header address of the root member.
    pub fn root(&self) -> Option<Address> {
        self.root
    }

    /// Forgets every member. Used when the space they live in is discarded.
    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    /// Marks `block` FREE and links it in at its address-sorted position,
    /// coalescing with adjacent free neighbors.
    ///
    /// # Safety
    ///
    /// `block` must be the header address of a block in `space` that is not
    /// currently a member, and every member must be a valid header in `space`.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::HeapCorrupted`] if no insertion point is found
    /// within one lap of the list.
    pub(crate) unsafe fn insert(&mut self, space: &HeapSpace, block: Address) -> GcResult<()> {
        header::header_mut(block).set_free();

        let root = match self.root {
            None => {
                header::header_mut(block).set_next_free(block);
                self.root = Some(block);
                self.len = 1;
                return Ok(());
            }
            Some(root) => root,
        };

        let mut hit = root;
        let mut steps = 0;
        loop {
            let next = header::header_ref(hit).next_free();
            if brackets(hit, next, block) {
                break;
            }
            steps += 1;
            if steps > self.len {
                return Err(GcError::HeapCorrupted(format!(
                    "no free-list slot for {} after {} steps",
                    block, steps
                )));
            }
            hit = next;
        }

        let upper = header::header_ref(hit).next_free();
        let mut len = self.len + 1;

        if adjacent(space, block, upper) {
            let absorbed = header::header_ref(upper).size();
            let upper_next = header::header_ref(upper).next_free();
            let freed = header::header_mut(block);
            freed.set_size(freed.size() + HEADER_SIZE + absorbed);
            len -= 1;
            log::trace!("coalesced {} into following free block", block);

            if upper == hit {
                // the only member sat right above the new block
                freed.set_next_free(block);
                self.root = Some(block);
                self.len = len;
                return Ok(());
            }
            freed.set_next_free(upper_next);
        } else {
            header::header_mut(block).set_next_free(upper);
        }

        if adjacent(space, hit, block) {
            let freed = *header::header_ref(block);
            let lower = header::header_mut(hit);
            lower.set_size(lower.size() + HEADER_SIZE + freed.size());
            lower.set_next_free(freed.next_free());
            len -= 1;
            log::trace!("coalesced {} into preceding free block", block);
        } else {
            header::header_mut(hit).set_next_free(block);
        }

        self.root = Some(hit);
        self.len = len;
        Ok(())
    }

    /// First-fit search for a block with a payload of at least `size` bytes.
    ///
    /// The block is unlinked and its header address returned. If the leftover
    /// can hold a header of its own, it is split off and stays on the list.
    /// The returned block keeps its FREE flag; the caller stamps it.
    ///
    /// # Safety
    ///
    /// Every member must be a valid header in a live segment.
    pub(crate) unsafe fn take_first_fit(&mut self, size: usize) -> Option<Address> {
        let root = self.root?;
        let mut prev = root;
        let mut cur = header::header_ref(root).next_free();

        for _ in 0..self.len {
            let found = header::header_ref(cur).size();
            if found >= size {
                let next = header::header_ref(cur).next_free();
                let rest = found - size;

                if rest >= HEADER_SIZE {
                    let remainder = cur.add(HEADER_SIZE + size);
                    header::write_header(
                        remainder,
                        header::BlockHeader::free(rest - HEADER_SIZE),
                    );
                    header::header_mut(cur).set_size(size);

                    if next == cur {
                        header::header_mut(remainder).set_next_free(remainder);
                        self.root = Some(remainder);
                    } else {
                        header::header_mut(remainder).set_next_free(next);
                        header::header_mut(prev).set_next_free(remainder);
                        self.root = Some(prev);
                    }
                    log::trace!("split {} leaving {} free bytes", cur, rest);
                } else if next == cur {
                    self.root = None;
                    self.len = 0;
                } else {
                    header::header_mut(prev).set_next_free(next);
                    self.root = Some(prev);
                    self.len -= 1;
                }

                header::header_mut(cur).set_next_free(Address::NULL);
                return Some(cur);
            }
            prev = cur;
            cur = header::header_ref(cur).next_free();
        }
        None
    }

    /// Iterates over member header addresses, starting at the root and
    /// stopping after one lap (or after `len` steps if the ring is broken).
    pub fn iter(&self) -> FreeListIter<'_> {
        FreeListIter {
            list: self,
            next: self.root,
            remaining: self.len,
        }
    }
}

/// Iterator over free-list members.
pub struct FreeListIter<'a> {
    list: &'a FreeList,
    next: Option<Address>,
    remaining: usize,
}

impl Iterator for FreeListIter<'_> {
    type Item = Address;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        self.remaining -= 1;
        // SAFETY: members are valid headers while the list is not cleared.
        let following = unsafe { header::header_ref(current).next_free() };
        self.next = if Some(following) == self.list.root {
            None
        } else {
            Some(following)
        };
        Some(current)
    }
}
