//! Allocator and Collector End-to-End Tests
//!
//! Walks the heap through the canonical allocate, release and collect
//! scenarios using only the public API, the way a host runtime would.

use heap_types::align_to_word;
use integration_tests::{object, tag, traced_heap};
use semispace_gc::header::header_of;
use semispace_gc::{
    Address, GcError, GrowthPolicy, Heap, HeapConfig, Liveness, PrefixedReferences, HEADER_SIZE,
    WORD_SIZE,
};

fn min_config() -> HeapConfig {
    let config = HeapConfig::default();
    HeapConfig {
        initial_space_bytes: config.min_space_bytes,
        ..config
    }
}

/// First allocation in a minimum-size heap
#[test]
fn test_first_allocation_at_first_usable() {
    let mut heap = Heap::with_config(min_config()).expect("heap init");
    let first_usable = heap.first_usable();

    let obj = heap.allocate(9).unwrap().unwrap();

    assert_eq!(obj, first_usable);
    assert_eq!(heap.cursor(), first_usable.add(align_to_word(9).unwrap()));
    assert_eq!(heap.payload(obj).unwrap().len(), 16);
}

/// A released block is the only free-list entry
#[test]
fn test_release_single_block() {
    let mut heap = Heap::with_config(min_config()).unwrap();
    let obj = heap.allocate(24).unwrap().unwrap();

    heap.release(obj).unwrap();

    assert_eq!(heap.free_blocks(), vec![(header_of(obj), 24)]);
    heap.verify().unwrap();
}

/// Releasing neighbors first-then-second coalesces them
#[test]
fn test_release_adjacent_blocks_coalesce() {
    let mut heap = Heap::with_config(min_config()).unwrap();
    let first = heap.allocate(16).unwrap().unwrap();
    let second = heap.allocate(32).unwrap().unwrap();

    heap.release(first).unwrap();
    heap.release(second).unwrap();

    assert_eq!(
        heap.free_blocks(),
        vec![(header_of(first), 16 + 32 + HEADER_SIZE)]
    );
}

/// Releasing neighbors second-then-first coalesces the same way
#[test]
fn test_release_adjacent_blocks_reverse_order() {
    let mut heap = Heap::with_config(min_config()).unwrap();
    let first = heap.allocate(16).unwrap().unwrap();
    let second = heap.allocate(32).unwrap().unwrap();

    heap.release(second).unwrap();
    heap.release(first).unwrap();

    assert_eq!(
        heap.free_blocks(),
        vec![(header_of(first), 16 + 32 + HEADER_SIZE)]
    );
}

/// A full space of rooted objects survives in order
#[test]
fn test_full_space_survives_collection() {
    let mut heap = traced_heap(HeapConfig {
        initial_space_bytes: 2048,
        min_space_bytes: 0,
        growth: GrowthPolicy::fixed(),
        ..HeapConfig::default()
    });
    let block = HEADER_SIZE + PrefixedReferences::payload_size(0, 8);
    let mut roots = Vec::new();
    while heap.cursor().add(block) <= heap.end() {
        let obj = object(&mut heap, 0, 8, roots.len());
        roots.push(heap.add_root(obj));
    }
    assert!(roots.len() > 10);

    heap.collect().unwrap();

    let moved: Vec<Address> = roots.iter().map(|&r| heap.root(r).unwrap()).collect();
    assert!(moved.windows(2).all(|w| w[0] < w[1]));
    for (i, &obj) in moved.iter().enumerate() {
        assert!(heap.is_live_block(obj));
        assert_eq!(tag(&heap, obj), i);
    }
    assert_eq!(
        heap.cursor(),
        heap.active_space().start().add(roots.len() * block)
    );
}

/// A full fixed heap collects on exhaustion and then
/// reports out of memory once nothing more can be reclaimed
#[test]
fn test_full_fixed_heap_exhausts() {
    let mut heap = traced_heap(HeapConfig {
        initial_space_bytes: 1024,
        min_space_bytes: 0,
        growth: GrowthPolicy::fixed(),
        ..HeapConfig::default()
    });
    let err = loop {
        match heap.allocate(PrefixedReferences::payload_size(0, 8)) {
            Ok(Some(obj)) => {
                heap.write_word(obj, 0, Address::NULL).unwrap();
                heap.add_root(obj);
            }
            Ok(None) => unreachable!("non-empty request"),
            Err(err) => break err,
        }
    };

    assert!(matches!(err, GcError::OutOfMemory { .. }));
    assert!(heap.stats().collections >= 1);
    heap.verify().unwrap();
}

/// An object whose roots were dropped is reclaimed
#[test]
fn test_unrooted_object_reclaimed() {
    let mut heap = traced_heap(min_config());
    let obj = object(&mut heap, 0, 16, 7);
    let root = heap.add_root(obj);
    heap.remove_root(root);

    heap.collect().unwrap();

    assert_eq!(heap.blocks().count(), 0);
    assert_eq!(heap.stats().objects_reclaimed, 1);
}

/// The allocated-flag fallback keeps an unrooted object
#[test]
fn test_unrooted_object_kept_by_allocated_flag() {
    let mut heap = traced_heap(HeapConfig {
        liveness: Liveness::AllocatedFlag,
        ..min_config()
    });
    object(&mut heap, 0, 16, 7);

    heap.collect().unwrap();

    assert_eq!(heap.blocks().count(), 1);
}

/// A released block is reused before the cursor moves
#[test]
fn test_free_block_reused() {
    let mut heap = Heap::with_config(min_config()).unwrap();
    let a = heap.allocate(32).unwrap().unwrap();
    let _b = heap.allocate(8).unwrap().unwrap();
    heap.release(a).unwrap();
    let cursor = heap.cursor();

    let c = heap.allocate(32).unwrap().unwrap();

    assert_eq!(c, a);
    assert_eq!(heap.cursor(), cursor);
    assert!(heap.free_blocks().is_empty());
}

/// Releases drop the free list at the next cycle and compact survivors
#[test]
fn test_collection_discards_free_list() {
    let mut heap = traced_heap(HeapConfig::with_space_bytes(4096));
    let keep = object(&mut heap, 0, 8, 1);
    let drop = object(&mut heap, 0, 8, 2);
    let root = heap.add_root(keep);
    heap.release(drop).unwrap();
    assert_eq!(heap.free_blocks().len(), 1);

    heap.collect().unwrap();

    assert!(heap.free_blocks().is_empty());
    let keep = heap.root(root).unwrap();
    assert_eq!(keep, heap.first_usable());
    assert_eq!(tag(&heap, keep), 1);
}

/// A linked structure keeps its shape through several cycles
#[test]
fn test_linked_list_survives_cycles() {
    let mut heap = traced_heap(HeapConfig::with_space_bytes(4096));
    let head = object(&mut heap, 1, 8, 0);
    let root = heap.add_root(head);
    let mut tail = head;
    for i in 1..20 {
        // garbage between list cells
        object(&mut heap, 0, 24, 1000 + i);
        let next = object(&mut heap, 1, 8, i);
        heap.write_word(tail, PrefixedReferences::field_offset(0), next)
            .unwrap();
        tail = next;
    }

    for _ in 0..3 {
        heap.collect().unwrap();
    }

    let mut cell = heap.root(root).unwrap();
    for i in 0..20 {
        assert_eq!(tag(&heap, cell), i);
        cell = heap
            .read_word(cell, PrefixedReferences::field_offset(0))
            .unwrap();
    }
    assert!(cell.is_null());
    assert_eq!(heap.blocks().count(), 20);
}

/// Exhaustion with growth enabled enlarges both spaces
#[test]
fn test_growth_keeps_objects() {
    let mut heap = traced_heap(HeapConfig {
        initial_space_bytes: 512,
        min_space_bytes: 0,
        ..HeapConfig::default()
    });
    let initial = heap.active_space().capacity();
    let mut roots = Vec::new();
    for i in 0..64 {
        let obj = object(&mut heap, 0, 4 * WORD_SIZE, i);
        roots.push(heap.add_root(obj));
    }

    assert!(heap.active_space().capacity() > initial);
    assert_eq!(
        heap.active_space().capacity(),
        heap.reserve_space().capacity()
    );
    assert!(heap.stats().growths >= 1);
    for (i, &root) in roots.iter().enumerate() {
        assert_eq!(tag(&heap, heap.root(root).unwrap()), i);
    }
    heap.verify().unwrap();
}

/// Bad handles are rejected without touching the heap
#[test]
fn test_release_contract_violations() {
    let mut heap = Heap::with_config(min_config()).unwrap();
    let obj = heap.allocate(16).unwrap().unwrap();
    heap.release(obj).unwrap();

    assert!(matches!(heap.release(obj), Err(GcError::DoubleFree { .. })));
    assert!(matches!(
        heap.release(Address::new(WORD_SIZE)),
        Err(GcError::InvalidRelease { .. })
    ));
    assert!(matches!(
        heap.release(obj.add(1)),
        Err(GcError::InvalidRelease { .. })
    ));
    heap.verify().unwrap();
}
