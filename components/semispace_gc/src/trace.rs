//! Collaborator interfaces for tracing.
//!
//! The collector does not understand object layouts. An [`ObjectTracer`]
//! reports where the reference fields of a payload are, and a [`RootSource`]
//! hands out the slots the mutator holds references in. Both are supplied by
//! the host runtime.
//!
//! A reference field is one word holding the payload address of another
//! object, or 0 for null. Words that point outside the active space are left
//! alone.

use heap_types::{Address, WORD_SIZE};
use std::cell::RefCell;
use std::rc::Rc;

/// Reports the reference fields of an object.
pub trait ObjectTracer {
    /// Calls `visit` with the byte offset of every reference field in `payload`.
    ///
    /// Offsets must be word aligned and leave room for a full word inside the
    /// payload; the collector rejects anything else.
    fn trace(&self, payload: &[u8], visit: &mut dyn FnMut(usize));
}

/// Tracer for heaps of leaf objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReferences;

impl ObjectTracer for NoReferences {
    fn trace(&self, _payload: &[u8], _visit: &mut dyn FnMut(usize)) {}
}

/// Tracer for a simple self-describing layout.
///
/// Word 0 of the payload holds a count `n`; words `1..=n` are reference
/// fields. Anything after them is opaque data. An empty payload has no
/// references.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixedReferences;

impl PrefixedReferences {
    /// Payload bytes needed for `refs` reference fields followed by
    /// `data_bytes` of opaque data.
    pub const fn payload_size(refs: usize, data_bytes: usize) -> usize {
        (refs + 1) * WORD_SIZE + data_bytes
    }

    /// Byte offset of reference field `index`.
    pub const fn field_offset(index: usize) -> usize {
        (index + 1) * WORD_SIZE
    }

    /// Byte offset of the first opaque data byte for an object with `refs`
    /// reference fields.
    pub const fn data_offset(refs: usize) -> usize {
        (refs + 1) * WORD_SIZE
    }
}

impl ObjectTracer for PrefixedReferences {
    fn trace(&self, payload: &[u8], visit: &mut dyn FnMut(usize)) {
        let count = match read_word(payload, 0) {
            Some(count) => count,
            None => return,
        };
        for index in 0..count {
            let offset = Self::field_offset(index);
            visit(offset);
            if offset + WORD_SIZE > payload.len() {
                // the collector reports this one; a corrupt count could be huge
                break;
            }
        }
    }
}

/// Reads the native-endian word at `offset`, if it fits in `bytes`.
pub(crate) fn read_word(bytes: &[u8], offset: usize) -> Option<usize> {
    let end = offset.checked_add(WORD_SIZE)?;
    let word = bytes.get(offset..end)?;
    let mut buf = [0u8; WORD_SIZE];
    buf.copy_from_slice(word);
    Some(usize::from_ne_bytes(buf))
}

/// Writes a native-endian word at `offset`. Returns false if it does not fit.
pub(crate) fn write_word(bytes: &mut [u8], offset: usize, value: usize) -> bool {
    let end = match offset.checked_add(WORD_SIZE) {
        Some(end) => end,
        None => return false,
    };
    match bytes.get_mut(offset..end) {
        Some(word) => {
            word.copy_from_slice(&value.to_ne_bytes());
            true
        }
        None => false,
    }
}

/// Supplies the root set.
///
/// Slots are handed out mutably: after relocation the collector rewrites
/// each one to the new address of its referent.
pub trait RootSource {
    /// Calls `visitor` once per root slot.
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Address));
}

impl RootSource for Vec<Address> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Address)) {
        self.as_mut_slice().visit_roots(visitor);
    }
}

impl RootSource for [Address] {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Address)) {
        for slot in self.iter_mut() {
            visitor(slot);
        }
    }
}

impl RootSource for Address {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Address)) {
        visitor(self);
    }
}

/// Shared root sources, so a host can keep a handle to roots it registered
/// with the heap.
impl<T: RootSource + ?Sized> RootSource for Rc<RefCell<T>> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Address)) {
        self.borrow_mut().visit_roots(visitor);
    }
}

/// Handle to a slot in a [`RootSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootHandle(usize);

impl RootHandle {
    /// Slot index of this handle.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Table of root slots owned by the heap.
///
/// Removed slots are recycled, so handles stay small integers.
#[derive(Debug, Default)]
pub struct RootSet {
    slots: Vec<Option<Address>>,
    vacant: Vec<usize>,
}

impl RootSet {
    /// Creates an empty root set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a root and returns its handle.
    pub fn add(&mut self, addr: Address) -> RootHandle {
        match self.vacant.pop() {
            Some(index) => {
                self.slots[index] = Some(addr);
                RootHandle(index)
            }
            None => {
                self.slots.push(Some(addr));
                RootHandle(self.slots.len() - 1)
            }
        }
    }

    /// Current value of a root, or `None` if the handle was removed.
    pub fn get(&self, handle: RootHandle) -> Option<Address> {
        self.slots.get(handle.0).copied().flatten()
    }

    /// Overwrites a root. Returns false if the handle was removed.
    pub fn set(&mut self, handle: RootHandle, addr: Address) -> bool {
        match self.slots.get_mut(handle.0) {
            Some(Some(slot)) => {
                *slot = addr;
                true
            }
            _ => false,
        }
    }

    /// Removes a root, returning its last value.
    pub fn remove(&mut self, handle: RootHandle) -> Option<Address> {
        let old = self.slots.get_mut(handle.0)?.take()?;
        self.vacant.push(handle.0);
        Some(old)
    }

    /// Number of live roots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }

    /// Returns true if there are no roots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over live root values.
    pub fn iter(&self) -> impl Iterator<Item = Address> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }
}

impl RootSource for RootSet {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Address)) {
        for slot in self.slots.iter_mut().flatten() {
            visitor(slot);
        }
    }
}

/// Every root source of a heap for one collection cycle.
pub(crate) struct RootScope<'a, 'x> {
    pub(crate) table: &'a mut RootSet,
    pub(crate) sources: &'a mut [Box<dyn RootSource>],
    pub(crate) extra: Option<&'a mut (dyn RootSource + 'x)>,
}

impl RootSource for RootScope<'_, '_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Address)) {
        self.table.visit_roots(visitor);
        for source in self.sources.iter_mut() {
            source.visit_roots(visitor);
        }
        if let Some(extra) = self.extra.as_mut() {
            extra.visit_roots(visitor);
        }
    }
}
