//! Built-in scenarios.
//!
//! Each scenario builds a fresh heap and checks one behavior end to end. A
//! failing check is reported, not panicked on, so one broken scenario does
//! not hide the others.

use heap_types::align_to_word;
use semispace_gc::header::header_of;
use semispace_gc::{
    Address, GrowthPolicy, Heap, HeapConfig, Liveness, HEADER_SIZE, WORD_SIZE,
};
use serde::Serialize;
use std::fmt;

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioResult {
    /// Short scenario name
    pub name: &'static str,
    /// What the scenario checks
    pub description: &'static str,
    /// Whether every check held
    pub passed: bool,
    /// Failure explanation, empty on success
    pub detail: String,
}

/// Outcome of a full self-test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelftestReport {
    /// Per-scenario results in run order
    pub scenarios: Vec<ScenarioResult>,
}

impl SelftestReport {
    /// Number of failed scenarios.
    pub fn failed(&self) -> usize {
        self.scenarios.iter().filter(|s| !s.passed).count()
    }
}

impl fmt::Display for SelftestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.scenarios {
            let status = if s.passed { "ok" } else { "FAILED" };
            write!(f, "{:<24} {:<7} {}", s.name, status, s.description)?;
            if !s.passed {
                write!(f, "\n    {}", s.detail)?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "{} passed, {} failed",
            self.scenarios.len() - self.failed(),
            self.failed()
        )
    }
}

type Check = Result<(), String>;

macro_rules! ensure {
    ($cond:expr, $($fmt:tt)+) => {
        if !$cond {
            return Err(format!($($fmt)+));
        }
    };
}

/// Unwraps a heap result inside a scenario.
fn step<T>(result: semispace_gc::GcResult<T>, what: &str) -> Result<T, String> {
    result.map_err(|e| format!("{} failed: {}", what, e))
}

fn alloc(heap: &mut Heap, size: usize) -> Result<Address, String> {
    step(heap.allocate(size), "allocate")?.ok_or_else(|| format!("allocate({}) returned nothing", size))
}

fn min_heap() -> Result<Heap, String> {
    let config = HeapConfig::default();
    step(
        Heap::with_config(HeapConfig {
            initial_space_bytes: config.min_space_bytes,
            ..config
        }),
        "heap init",
    )
}

/// The first allocation lands at the first usable address.
fn first_allocation() -> Check {
    let mut heap = min_heap()?;
    let first_usable = heap.first_usable();
    let obj = alloc(&mut heap, 9)?;
    ensure!(obj == first_usable, "got {}, expected {}", obj, first_usable);
    let aligned = align_to_word(9).ok_or_else(|| "word alignment overflowed".to_string())?;
    let expected = first_usable.add(aligned);
    ensure!(
        heap.cursor() == expected,
        "cursor {} after 9 bytes, expected {}",
        heap.cursor(),
        expected
    );
    Ok(())
}

/// A released block becomes the only free-list entry.
fn release_single() -> Check {
    let mut heap = min_heap()?;
    let obj = alloc(&mut heap, 16)?;
    step(heap.release(obj), "release")?;
    let free = heap.free_blocks();
    ensure!(
        free == vec![(header_of(obj), 16)],
        "free list {:?}, expected one entry at {}",
        free,
        header_of(obj)
    );
    Ok(())
}

/// Releasing neighbors in order coalesces them.
fn release_adjacent() -> Check {
    let mut heap = min_heap()?;
    let a = alloc(&mut heap, 16)?;
    let b = alloc(&mut heap, 24)?;
    step(heap.release(a), "release first")?;
    step(heap.release(b), "release second")?;
    let free = heap.free_blocks();
    let span = 16 + 24 + HEADER_SIZE;
    ensure!(
        free == vec![(header_of(a), span)],
        "free list {:?}, expected one {}-byte entry at {}",
        free,
        span,
        header_of(a)
    );
    step(heap.verify(), "verify")
}

/// A full space of rooted objects survives a cycle in order.
fn full_space_survives() -> Check {
    let mut heap = step(
        Heap::with_config(HeapConfig {
            initial_space_bytes: 1024,
            min_space_bytes: 0,
            growth: GrowthPolicy::fixed(),
            ..HeapConfig::default()
        }),
        "heap init",
    )?;
    let size = 3 * WORD_SIZE;
    let mut handles = Vec::new();
    while heap.cursor().add(HEADER_SIZE + size) <= heap.end() {
        let obj = alloc(&mut heap, size)?;
        step(heap.payload_mut(obj), "payload")?[0] = handles.len() as u8;
        handles.push(heap.add_root(obj));
    }
    let before: Vec<Address> = handles.iter().filter_map(|&h| heap.root(h)).collect();

    step(heap.collect(), "collect")?;

    let after: Vec<Address> = handles.iter().filter_map(|&h| heap.root(h)).collect();
    ensure!(after.len() == before.len(), "lost roots");
    for (i, &obj) in after.iter().enumerate() {
        ensure!(heap.is_live_block(obj), "object {} missing after the cycle", i);
        let tag = step(heap.payload(obj), "payload")?[0];
        ensure!(tag == i as u8, "object {} carries tag {}", i, tag);
    }
    ensure!(
        after.windows(2).all(|w| w[0] < w[1]),
        "relative order changed"
    );
    let live = after.len() * (HEADER_SIZE + size);
    let expected = heap.active_space().start().add(live);
    ensure!(
        heap.cursor() == expected,
        "cursor {} does not reflect {} live bytes",
        heap.cursor(),
        live
    );
    Ok(())
}

/// An object with no roots does not survive a cycle.
fn unrooted_reclaimed() -> Check {
    let mut heap = min_heap()?;
    let obj = alloc(&mut heap, 32)?;
    let root = heap.add_root(obj);
    heap.remove_root(root);
    step(heap.collect(), "collect")?;
    ensure!(heap.blocks().count() == 0, "the new active space is not empty");
    ensure!(!heap.is_live_block(heap.first_usable()), "object still present");
    Ok(())
}

/// The allocated-flag fallback keeps unreleased garbage, which is why
/// reachability is the default.
fn allocated_flag_gap() -> Check {
    let mut heap = step(
        Heap::with_config(HeapConfig {
            liveness: Liveness::AllocatedFlag,
            ..HeapConfig::default()
        }),
        "heap init",
    )?;
    alloc(&mut heap, 32)?;
    step(heap.collect(), "collect")?;
    ensure!(
        heap.blocks().count() == 1,
        "allocated-flag mode reclaimed an unreleased block"
    );
    Ok(())
}

/// Runs every scenario.
pub fn run_selftest() -> SelftestReport {
    let scenarios: [(&'static str, &'static str, fn() -> Check); 6] = [
        ("first-allocation", "allocate 9 bytes in a minimum heap", first_allocation),
        ("release", "one released block is one free-list entry", release_single),
        ("coalesce", "adjacent releases merge", release_adjacent),
        ("full-space-cycle", "rooted objects survive in order", full_space_survives),
        ("unrooted", "unrooted objects are reclaimed", unrooted_reclaimed),
        ("allocated-flag", "flag liveness keeps garbage", allocated_flag_gap),
    ];

    let mut report = SelftestReport::default();
    for (name, description, check) in scenarios {
        let outcome = check();
        log::debug!("scenario {}: {:?}", name, outcome);
        report.scenarios.push(ScenarioResult {
            name,
            description,
            passed: outcome.is_ok(),
            detail: outcome.err().unwrap_or_default(),
        });
    }
    report
}
