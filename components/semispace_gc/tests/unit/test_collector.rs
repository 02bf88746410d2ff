//! Collection cycles through the public heap API.

use semispace_gc::{
    Address, GcError, Heap, HeapConfig, Liveness, PrefixedReferences, RootSource, HEADER_SIZE,
    WORD_SIZE,
};
use std::cell::RefCell;
use std::rc::Rc;

fn traced_heap(bytes: usize) -> Heap {
    Heap::builder()
        .with_config(HeapConfig {
            initial_space_bytes: bytes,
            min_space_bytes: 0,
            verify_collections: true,
            ..HeapConfig::default()
        })
        .with_tracer(PrefixedReferences)
        .build()
        .unwrap()
}

/// Allocates a node with `refs` reference fields and `data` opaque bytes.
fn node(heap: &mut Heap, refs: usize, data: usize) -> Address {
    let obj = heap
        .allocate(PrefixedReferences::payload_size(refs, data))
        .unwrap()
        .unwrap();
    heap.write_word(obj, 0, Address::new(refs)).unwrap();
    obj
}

fn link(heap: &mut Heap, from: Address, field: usize, to: Address) {
    heap.write_word(from, PrefixedReferences::field_offset(field), to)
        .unwrap();
}

fn field(heap: &Heap, obj: Address, field: usize) -> Address {
    heap.read_word(obj, PrefixedReferences::field_offset(field))
        .unwrap()
}

#[test]
fn test_empty_heap_collects() {
    let mut heap = traced_heap(512);
    heap.collect().unwrap();
    assert_eq!(heap.cursor(), heap.active_space().start());
    assert_eq!(heap.stats().collections, 1);
}

#[test]
fn test_spaces_swap() {
    let mut heap = traced_heap(512);
    let old_active = heap.active_space().start();
    let old_reserve = heap.reserve_space().start();
    heap.collect().unwrap();
    assert_eq!(heap.active_space().start(), old_reserve);
    assert_eq!(heap.reserve_space().start(), old_active);
    heap.collect().unwrap();
    assert_eq!(heap.active_space().start(), old_active);
}

#[test]
fn test_payload_contents_survive() {
    let mut heap = traced_heap(512);
    let obj = node(&mut heap, 0, 16);
    let data = PrefixedReferences::data_offset(0);
    heap.payload_mut(obj).unwrap()[data..data + 4].copy_from_slice(b"semi");
    let root = heap.add_root(obj);

    heap.collect().unwrap();
    let moved = heap.root(root).unwrap();
    assert_eq!(&heap.payload(moved).unwrap()[data..data + 4], b"semi");
}

#[test]
fn test_reachable_through_fields() {
    let mut heap = traced_heap(1024);
    let a = node(&mut heap, 2, 0);
    let b = node(&mut heap, 0, 8);
    let _garbage = node(&mut heap, 0, 8);
    let c = node(&mut heap, 1, 0);
    link(&mut heap, a, 0, b);
    link(&mut heap, a, 1, c);
    link(&mut heap, c, 0, b);
    let root = heap.add_root(a);

    heap.collect().unwrap();
    let report = heap.last_collection().unwrap();
    assert_eq!(report.objects_copied, 3);
    assert_eq!(report.objects_reclaimed, 1);

    let a = heap.root(root).unwrap();
    let b = field(&heap, a, 0);
    let c = field(&heap, a, 1);
    assert_eq!(field(&heap, c, 0), b);
    // scan order a, b, c is kept
    assert!(a < b && b < c);
}

#[test]
fn test_self_reference() {
    let mut heap = traced_heap(512);
    let obj = node(&mut heap, 1, 0);
    link(&mut heap, obj, 0, obj);
    let root = heap.add_root(obj);

    heap.allocate(32).unwrap();
    heap.collect().unwrap();
    let moved = heap.root(root).unwrap();
    assert_eq!(moved, heap.first_usable());
    assert_eq!(field(&heap, moved, 0), moved);
}

#[test]
fn test_unreachable_cycle_is_reclaimed() {
    let mut heap = traced_heap(512);
    let a = node(&mut heap, 1, 0);
    let b = node(&mut heap, 1, 0);
    link(&mut heap, a, 0, b);
    link(&mut heap, b, 0, a);

    heap.collect().unwrap();
    assert_eq!(heap.blocks().count(), 0);
    assert_eq!(heap.last_collection().unwrap().objects_reclaimed, 2);
}

#[test]
fn test_allocated_flag_keeps_unreachable_cycle() {
    let mut heap = Heap::builder()
        .with_config(HeapConfig {
            initial_space_bytes: 512,
            min_space_bytes: 0,
            liveness: Liveness::AllocatedFlag,
            ..HeapConfig::default()
        })
        .with_tracer(PrefixedReferences)
        .build()
        .unwrap();
    let a = node(&mut heap, 1, 0);
    let b = node(&mut heap, 1, 0);
    link(&mut heap, a, 0, b);
    link(&mut heap, b, 0, a);

    heap.collect().unwrap();
    let survivors: Vec<_> = heap.blocks().map(|b| b.payload).collect();
    assert_eq!(survivors.len(), 2);
    // fields still point at the copies
    assert_eq!(field(&heap, survivors[0], 0), survivors[1]);
    assert_eq!(field(&heap, survivors[1], 0), survivors[0]);
}

#[test]
fn test_registered_root_source_is_rewritten() {
    let mut heap = traced_heap(512);
    let _garbage = node(&mut heap, 0, 8);
    let obj = node(&mut heap, 0, 8);
    let stack = Rc::new(RefCell::new(vec![obj]));
    heap.register_root_source(Box::new(stack.clone()));

    heap.collect().unwrap();
    assert_eq!(stack.borrow()[0], heap.first_usable());
}

#[test]
fn test_custom_root_source() {
    struct Pair(Address, Address);
    impl RootSource for Pair {
        fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Address)) {
            visitor(&mut self.0);
            visitor(&mut self.1);
        }
    }

    let mut heap = traced_heap(512);
    let a = node(&mut heap, 0, 8);
    let b = node(&mut heap, 0, 8);
    let mut pair = Pair(b, a);

    heap.collect_with(&mut pair).unwrap();
    assert_eq!(pair.1, heap.first_usable());
    assert_eq!(pair.0, pair.1.add(HEADER_SIZE + 2 * WORD_SIZE));
}

#[test]
fn test_dangling_field_fails_cleanly() {
    let mut heap = traced_heap(512);
    let a = node(&mut heap, 1, 0);
    let b = node(&mut heap, 0, 8);
    link(&mut heap, a, 0, b);
    heap.release(b).unwrap();
    let root = heap.add_root(a);

    assert_eq!(
        heap.collect(),
        Err(GcError::DanglingReference { address: b })
    );
    assert_eq!(heap.root(root), Some(a));
    assert_eq!(field(&heap, a, 0), b);
    assert_eq!(heap.free_blocks().len(), 1);
}

#[test]
fn test_reference_count_past_payload() {
    let mut heap = traced_heap(512);
    let obj = node(&mut heap, 1, 0);
    heap.write_word(obj, 0, Address::new(3)).unwrap();
    heap.add_root(obj);

    assert!(matches!(
        heap.collect(),
        Err(GcError::InvalidReferenceField { .. })
    ));
}

#[test]
fn test_external_references_untouched() {
    let mut heap = traced_heap(512);
    let outside = Box::new([0usize; 2]);
    let outside = Address::from_ptr(outside.as_ptr());
    let obj = node(&mut heap, 1, 0);
    link(&mut heap, obj, 0, outside);
    let root = heap.add_root(obj);

    heap.collect().unwrap();
    assert_eq!(field(&heap, heap.root(root).unwrap(), 0), outside);
}

#[test]
fn test_pause_times_recorded() {
    let mut heap = traced_heap(512);
    heap.collect().unwrap();
    heap.collect().unwrap();
    let stats = heap.stats();
    assert_eq!(stats.collections, 2);
    assert!(stats.total_pause >= stats.last_pause);
}
