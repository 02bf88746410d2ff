//! Exhaustion handling and heap growth.

use semispace_gc::{
    BlockState, BoundedMemory, GcError, GcResult, GrowthPolicy, Heap, HeapConfig, MemorySource,
    Region, RootHandle, HEADER_SIZE,
};
use std::collections::VecDeque;

fn config(bytes: usize, growth: GrowthPolicy) -> HeapConfig {
    HeapConfig {
        initial_space_bytes: bytes,
        min_space_bytes: 0,
        growth,
        verify_collections: true,
        ..HeapConfig::default()
    }
}

fn fill_rooted(heap: &mut Heap, count: usize, size: usize) -> Vec<RootHandle> {
    (0..count)
        .map(|_| {
            let obj = heap.allocate(size).unwrap().unwrap();
            heap.add_root(obj)
        })
        .collect()
}

#[test]
fn test_collect_before_grow() {
    let mut heap = Heap::with_config(config(256, GrowthPolicy::default())).unwrap();
    // garbage only: collection alone makes room
    for _ in 0..50 {
        heap.allocate(16).unwrap().unwrap();
    }
    assert!(heap.stats().collections > 0);
    assert_eq!(heap.stats().growths, 0);
}

#[test]
fn test_grow_only_policy_never_collects() {
    let policy = GrowthPolicy {
        collect_on_exhaustion: false,
        ..GrowthPolicy::default()
    };
    let mut heap = Heap::with_config(config(256, policy)).unwrap();
    for _ in 0..50 {
        heap.allocate(16).unwrap().unwrap();
    }
    assert_eq!(heap.stats().collections, 0);
    assert!(heap.stats().growths > 0);
    let allocated = heap
        .blocks()
        .filter(|b| b.state == Some(BlockState::Allocated))
        .count();
    assert_eq!(allocated, 50);
}

#[test]
fn test_collect_only_policy_fails_when_live() {
    let policy = GrowthPolicy {
        allow_growth: false,
        ..GrowthPolicy::default()
    };
    let mut heap = Heap::with_config(config(256, policy)).unwrap();
    let block = 16 + HEADER_SIZE;
    let fits = heap.active_space().capacity() / block;
    fill_rooted(&mut heap, fits, 16);

    assert_eq!(
        heap.allocate(16),
        Err(GcError::OutOfMemory { requested: 16 })
    );
    assert_eq!(heap.stats().collections, 1);
    assert_eq!(heap.blocks().count(), fits);
}

#[test]
fn test_growth_preserves_addresses() {
    let mut heap = Heap::with_config(config(256, GrowthPolicy::default())).unwrap();
    let first = heap.allocate(64).unwrap().unwrap();
    heap.payload_mut(first).unwrap()[0] = 0x5a;

    heap.grow(1024).unwrap();
    assert!(heap.is_live_block(first));
    assert_eq!(heap.payload(first).unwrap()[0], 0x5a);
    assert_eq!(
        heap.active_space().capacity(),
        heap.reserve_space().capacity()
    );
}

#[test]
fn test_large_request_grows_enough() {
    let mut heap = Heap::with_config(config(256, GrowthPolicy::default())).unwrap();
    let big = heap.allocate(8192).unwrap().unwrap();
    assert_eq!(heap.payload(big).unwrap().len(), 8192);
    assert_eq!(heap.stats().growths, 1);
}

#[test]
fn test_max_space_caps_growth() {
    let policy = GrowthPolicy {
        max_space_bytes: Some(1024),
        ..GrowthPolicy::default()
    };
    let mut heap = Heap::with_config(config(256, policy)).unwrap();
    let err = loop {
        match heap.allocate(16) {
            Ok(Some(obj)) => {
                heap.add_root(obj);
            }
            Ok(None) => unreachable!(),
            Err(err) => break err,
        }
    };
    assert!(matches!(err, GcError::OutOfMemory { .. }));
    assert!(heap.active_space().capacity() <= 1024);
    heap.verify().unwrap();
}

#[test]
fn test_bounded_memory_initial_pair() {
    let result = Heap::builder()
        .with_config(config(4096, GrowthPolicy::default()))
        .with_memory_source(BoundedMemory::new(4096))
        .build();
    assert!(matches!(result, Err(GcError::OutOfMemory { .. })));
}

#[test]
fn test_collection_spans_segments() {
    let mut heap = Heap::with_config(config(256, GrowthPolicy::default())).unwrap();
    let roots = fill_rooted(&mut heap, 30, 16);
    assert!(heap.active_space().segments().len() > 1);

    let before: Vec<_> = roots.iter().map(|&h| heap.root(h).unwrap()).collect();
    heap.collect().unwrap();
    let after: Vec<_> = roots.iter().map(|&h| heap.root(h).unwrap()).collect();

    assert!(after.iter().all(|&a| heap.is_live_block(a)));
    // relative order survives the move
    let mut order_before: Vec<_> = (0..before.len()).collect();
    order_before.sort_by_key(|&i| before[i]);
    let mut order_after: Vec<_> = (0..after.len()).collect();
    order_after.sort_by_key(|&i| after[i]);
    assert_eq!(order_before, order_after);
}

#[test]
fn test_refused_growth_keeps_budget() {
    let space = 128 + HEADER_SIZE;
    let mut heap = Heap::builder()
        .with_config(config(128, GrowthPolicy::default()))
        .with_memory_source(BoundedMemory::new(2 * space + 2 * space + 10))
        .build()
        .unwrap();
    let obj = heap.allocate(128).unwrap().unwrap();
    heap.add_root(obj);

    // one region of this size would fit the budget, the pair does not
    assert!(matches!(
        heap.allocate(200),
        Err(GcError::OutOfMemory { .. })
    ));
    assert_eq!(heap.stats().growths, 0);

    heap.allocate(64).unwrap().unwrap();
    assert_eq!(heap.stats().growths, 1);
    heap.verify().unwrap();
}

/// Hands out prepared regions in order, then fresh ones.
struct ScriptedMemory {
    script: VecDeque<Region>,
}

impl MemorySource for ScriptedMemory {
    fn acquire(&mut self, bytes: usize) -> GcResult<Region> {
        match self.script.pop_front() {
            Some(region) => {
                assert_eq!(region.len(), bytes, "script out of step with the heap");
                Ok(region)
            }
            None => Region::allocate(bytes),
        }
    }
}

/// Regions in acquisition order (active, reserve, active, reserve) such
/// that the active space is [small, large] by address and the reserve is
/// [large, small].
fn crossed_regions(small: usize, large: usize) -> VecDeque<Region> {
    let mut smalls = Vec::new();
    let mut larges = Vec::new();
    for _ in 0..16 {
        smalls.push(Region::allocate(small).unwrap());
        larges.push(Region::allocate(large).unwrap());
    }
    smalls.sort_by_key(Region::start);
    larges.sort_by_key(Region::start);

    let active_small = smalls.remove(0);
    let reserve_small = smalls.pop().unwrap();
    let reserve_large = larges.remove(0);
    let active_large = larges.pop().unwrap();
    assert!(
        active_small.start() < active_large.start()
            && reserve_large.start() < reserve_small.start(),
        "allocator never interleaved the two region sizes"
    );
    VecDeque::from(vec![active_small, reserve_small, active_large, reserve_large])
}

/// A heap whose two full segments hold one rooted block each, and whose
/// reserve segments come in the opposite size order.
fn crossed_heap(policy: GrowthPolicy) -> (Heap, Vec<RootHandle>) {
    let small = 128 + HEADER_SIZE;
    let large = 136 + HEADER_SIZE;
    let mut heap = Heap::builder()
        .with_config(config(128, policy))
        .with_memory_source(ScriptedMemory {
            script: crossed_regions(small, large),
        })
        .build()
        .unwrap();

    let first = heap.allocate(128).unwrap().unwrap();
    heap.payload_mut(first).unwrap()[0] = 1;
    heap.grow(large).unwrap();
    let second = heap.allocate(136).unwrap().unwrap();
    heap.payload_mut(second).unwrap()[0] = 2;

    let reserve = heap.reserve_space().segments();
    assert_eq!(reserve[0].capacity(), large);
    assert_eq!(reserve[1].capacity(), small);
    let roots = vec![heap.add_root(first), heap.add_root(second)];
    (heap, roots)
}

#[test]
fn test_collect_grows_when_reserve_cannot_pack() {
    let (mut heap, roots) = crossed_heap(GrowthPolicy::default());

    heap.collect().unwrap();

    assert_eq!(heap.stats().growths, 2);
    assert_eq!(heap.stats().collections, 1);
    let moved: Vec<_> = roots.iter().map(|&r| heap.root(r).unwrap()).collect();
    assert!(moved[0] < moved[1]);
    assert_eq!(heap.payload(moved[0]).unwrap()[0], 1);
    assert_eq!(heap.payload(moved[1]).unwrap()[0], 2);
}

#[test]
fn test_allocation_grows_past_unpackable_collection() {
    let (mut heap, roots) = crossed_heap(GrowthPolicy::default());
    let before: Vec<_> = roots.iter().map(|&r| heap.root(r).unwrap()).collect();

    let third = heap.allocate(16).unwrap().unwrap();

    // the collection attempt failed without touching anything
    assert_eq!(heap.stats().collections, 0);
    assert_eq!(heap.stats().growths, 2);
    assert!(heap.is_live_block(third));
    let after: Vec<_> = roots.iter().map(|&r| heap.root(r).unwrap()).collect();
    assert_eq!(after, before);
    heap.verify().unwrap();
}

#[test]
fn test_unpackable_collection_without_growth() {
    let policy = GrowthPolicy {
        allow_growth: false,
        ..GrowthPolicy::default()
    };
    let (mut heap, roots) = crossed_heap(policy);
    let before: Vec<_> = roots.iter().map(|&r| heap.root(r).unwrap()).collect();

    let err = heap.collect().unwrap_err();

    assert!(matches!(
        err,
        GcError::ReserveOverflow { live_bytes, .. } if live_bytes == 264 + 2 * HEADER_SIZE
    ));
    assert!(!err.is_fatal());
    assert_eq!(heap.stats().collections, 0);
    let after: Vec<_> = roots.iter().map(|&r| heap.root(r).unwrap()).collect();
    assert_eq!(after, before);
    assert_eq!(heap.payload(after[1]).unwrap()[0], 2);
    heap.verify().unwrap();
}
