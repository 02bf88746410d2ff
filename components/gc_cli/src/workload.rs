//! Seeded random workload.
//!
//! The workload keeps two populations, both held through heap roots:
//!
//! - *nodes* carry two reference fields and may point at each other; they
//!   leave the population by being unrooted and are then reclaimed by the
//!   collector once nothing links to them
//! - *scratch* objects are never linked to and leave by explicit release
//!
//! Every object stores its serial number in the first data word. After each
//! collection and at the end, every rooted object's serial is checked, which
//! catches both misplaced copies and bad fix-ups.

use crate::cli::StressArgs;
use crate::error::{CliError, CliResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use semispace_gc::{
    Address, GcStats, Heap, HeapConfig, HeapStats, PrefixedReferences, RootHandle,
};
use serde::Serialize;
use std::fmt;

const NODE_REFS: usize = 2;
const MAX_DATA_BYTES: usize = 256;
const COLLECT_EVERY: usize = 1000;

/// Parameters of a stress run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressOptions {
    /// Heap configuration
    pub heap: HeapConfig,
    /// Number of random operations
    pub operations: usize,
    /// Random seed
    pub seed: u64,
}

impl StressOptions {
    /// Combines command-line arguments with the configuration file; the
    /// command line wins.
    pub fn from_args(args: &StressArgs, base: &HeapConfig) -> Self {
        let mut heap = base.clone();
        if let Some(bytes) = args.heap {
            heap.initial_space_bytes = bytes;
        }
        if let Some(liveness) = args.liveness {
            heap.liveness = liveness.into();
        }
        heap.verify_collections |= args.verify;
        StressOptions {
            heap,
            operations: args.operations,
            seed: args.seed,
        }
    }
}

/// Summary of a stress run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StressReport {
    /// Seed used
    pub seed: u64,
    /// Operations run
    pub operations: usize,
    /// Node allocations
    pub nodes: usize,
    /// Scratch allocations
    pub scratch: usize,
    /// Explicit releases
    pub releases: usize,
    /// Field writes linking two nodes
    pub links: usize,
    /// Nodes dropped from the root set
    pub unroots: usize,
    /// Rooted objects at the end
    pub rooted: usize,
    /// Collector totals
    pub gc: GcStats,
    /// Final heap snapshot
    pub heap: HeapStats,
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "seed {} / {} operations", self.seed, self.operations)?;
        writeln!(
            f,
            "allocated {} nodes + {} scratch, released {}, linked {}, unrooted {}, {} rooted at end",
            self.nodes, self.scratch, self.releases, self.links, self.unroots, self.rooted
        )?;
        writeln!(
            f,
            "collections {} (avg pause {:?}), growths {}, copied {} objects / {} bytes, reclaimed {} objects / {} bytes",
            self.gc.collections,
            self.gc.average_pause(),
            self.gc.growths,
            self.gc.objects_copied,
            self.gc.bytes_copied,
            self.gc.objects_reclaimed,
            self.gc.bytes_reclaimed
        )?;
        write!(
            f,
            "heap {} bytes in {} segment(s), {} used, {} free-list blocks ({} bytes)",
            self.heap.capacity,
            self.heap.segments,
            self.heap.used,
            self.heap.free_blocks,
            self.heap.free_bytes
        )
    }
}

/// A rooted object and the serial stored in it.
struct Tracked {
    root: RootHandle,
    serial: usize,
    refs: usize,
}

struct Workload {
    heap: Heap,
    rng: StdRng,
    nodes: Vec<Tracked>,
    scratch: Vec<Tracked>,
    serial: usize,
    report: StressReport,
}

impl Workload {
    fn allocate(&mut self, refs: usize) -> CliResult<Tracked> {
        let data = self.rng.gen_range(1..=MAX_DATA_BYTES / 8) * 8;
        let obj = self
            .heap
            .allocate(PrefixedReferences::payload_size(refs, data))?
            .ok_or_else(|| CliError::Workload("non-empty allocation returned nothing".into()))?;
        self.serial += 1;
        self.heap.write_word(obj, 0, Address::new(refs))?;
        self.heap.write_word(
            obj,
            PrefixedReferences::data_offset(refs),
            Address::new(self.serial),
        )?;
        Ok(Tracked {
            root: self.heap.add_root(obj),
            serial: self.serial,
            refs,
        })
    }

    fn address(&self, tracked: &Tracked) -> CliResult<Address> {
        self.heap
            .root(tracked.root)
            .ok_or_else(|| CliError::Workload(format!("root for serial {} vanished", tracked.serial)))
    }

    fn step(&mut self) -> CliResult<()> {
        let collections = self.heap.stats().collections;
        match self.rng.gen_range(0..100) {
            0..=34 => {
                let node = self.allocate(NODE_REFS)?;
                self.nodes.push(node);
                self.report.nodes += 1;
            }
            35..=54 => {
                let scratch = self.allocate(0)?;
                self.scratch.push(scratch);
                self.report.scratch += 1;
            }
            55..=69 if !self.scratch.is_empty() => {
                let index = self.rng.gen_range(0..self.scratch.len());
                let victim = self.scratch.swap_remove(index);
                let addr = self.address(&victim)?;
                self.heap.remove_root(victim.root);
                self.heap.release(addr)?;
                self.report.releases += 1;
            }
            70..=89 if self.nodes.len() >= 2 => {
                let from = self.rng.gen_range(0..self.nodes.len());
                let to = self.rng.gen_range(0..self.nodes.len());
                let field = self.rng.gen_range(0..NODE_REFS);
                let from_addr = self.address(&self.nodes[from])?;
                let to_addr = self.address(&self.nodes[to])?;
                self.heap.write_word(
                    from_addr,
                    PrefixedReferences::field_offset(field),
                    to_addr,
                )?;
                self.report.links += 1;
            }
            90..=99 if !self.nodes.is_empty() => {
                let index = self.rng.gen_range(0..self.nodes.len());
                let node = self.nodes.swap_remove(index);
                self.heap.remove_root(node.root);
                self.report.unroots += 1;
            }
            _ => {}
        }

        if self.heap.stats().collections != collections {
            self.check()?;
        }
        Ok(())
    }

    /// Checks every rooted object still carries its serial.
    fn check(&self) -> CliResult<()> {
        for tracked in self.nodes.iter().chain(&self.scratch) {
            let addr = self.address(tracked)?;
            let found = self
                .heap
                .read_word(addr, PrefixedReferences::data_offset(tracked.refs))?;
            if found.as_usize() != tracked.serial {
                return Err(CliError::Workload(format!(
                    "object at {} holds serial {}, expected {}",
                    addr,
                    found.as_usize(),
                    tracked.serial
                )));
            }
        }
        Ok(())
    }
}

/// Runs the workload and returns its report.
///
/// # Errors
///
/// Returns heap errors (including out of memory when growth is capped) and
/// [`CliError::Workload`] when an object's contents do not survive.
pub fn run_stress(options: &StressOptions) -> CliResult<StressReport> {
    let heap = Heap::builder()
        .with_config(options.heap.clone())
        .with_tracer(PrefixedReferences)
        .build()?;
    let mut workload = Workload {
        heap,
        rng: StdRng::seed_from_u64(options.seed),
        nodes: Vec::new(),
        scratch: Vec::new(),
        serial: 0,
        report: StressReport {
            seed: options.seed,
            operations: options.operations,
            ..StressReport::default()
        },
    };
    log::info!(
        "stress: {} operations, seed {}, {:?} liveness",
        options.operations,
        options.seed,
        options.heap.liveness
    );

    for i in 0..options.operations {
        workload.step()?;
        if (i + 1) % COLLECT_EVERY == 0 {
            workload.heap.collect()?;
            workload.check()?;
        }
    }
    workload.heap.collect()?;
    workload.check()?;
    workload.heap.verify()?;

    let mut report = workload.report;
    report.rooted = workload.nodes.len() + workload.scratch.len();
    report.gc = workload.heap.stats().clone();
    report.heap = workload.heap.heap_stats();
    Ok(report)
}
