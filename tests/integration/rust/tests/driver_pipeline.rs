//! Driver Pipeline Integration Tests
//!
//! Runs the driver library end to end: configuration text through to the
//! rendered report, the same path the `cpgc` binary takes.

use clap::Parser;
use gc_cli::{run, run_selftest, run_stress, Cli, CliConfig, CliError, StressOptions};
use semispace_gc::{GcError, GrowthPolicy, HeapConfig, Liveness};

fn cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("cpgc").chain(args.iter().copied()))
        .expect("arguments rejected")
}

/// Test: every built-in scenario passes
#[test]
fn test_selftest_passes() {
    let report = run_selftest();
    assert_eq!(report.failed(), 0, "{}", report);
    assert!(report.scenarios.len() >= 5);
}

/// Test: configuration file values reach the heap
#[test]
fn test_config_drives_stress() {
    let config = CliConfig::from_json(
        r#"{
            "log_level": "info",
            "heap": {
                "initial_space_bytes": 2048,
                "liveness": "allocated_flag",
                "growth": { "growth_factor": 3 }
            }
        }"#,
    )
    .unwrap();
    let out = run(&cli(&["stress", "--operations", "600", "--json"]), &config).unwrap();
    let json: serde_json::Value = serde_json::from_str(&out).unwrap();

    assert_eq!(json["operations"], 600);
    assert!(json["heap"]["capacity"].as_u64().unwrap() >= 2048);
}

/// Test: command-line flags override the configuration file
#[test]
fn test_flags_override_config() {
    let config = CliConfig::from_json(r#"{"heap": {"liveness": "allocated_flag"}}"#).unwrap();
    let parsed = cli(&["stress", "--liveness", "reachability", "--heap", "4096"]);
    let args = match &parsed.command {
        gc_cli::Command::Stress(args) => args,
        other => panic!("unexpected command {:?}", other),
    };

    let options = StressOptions::from_args(args, &config.heap);
    assert_eq!(options.heap.liveness, Liveness::Reachability);
    assert_eq!(options.heap.initial_space_bytes, 4096);
}

/// Test: an invalid log level in the file is rejected at load time
#[test]
fn test_bad_log_level_rejected() {
    let result = CliConfig::from_json(r#"{"log_level": "loud"}"#);
    assert!(matches!(result, Err(CliError::InvalidLogLevel(level)) if level == "loud"));
}

/// Test: stress runs across seeds, liveness modes and tiny heaps
#[test]
fn test_stress_matrix() {
    for seed in [0, 3, 99] {
        for liveness in [Liveness::Reachability, Liveness::AllocatedFlag] {
            let options = StressOptions {
                heap: HeapConfig {
                    initial_space_bytes: 1024,
                    liveness,
                    verify_collections: true,
                    ..HeapConfig::default()
                },
                operations: 2500,
                seed,
            };
            let report = run_stress(&options)
                .unwrap_or_else(|e| panic!("seed {} {:?}: {}", seed, liveness, e));
            assert!(report.gc.collections >= 3);
            assert!(report.gc.growths >= 1, "a 1 KiB heap must grow");
        }
    }
}

/// Test: a fixed heap too small for the live set reports out of memory
#[test]
fn test_stress_fixed_heap_out_of_memory() {
    let options = StressOptions {
        heap: HeapConfig {
            initial_space_bytes: 1024,
            growth: GrowthPolicy::fixed(),
            ..HeapConfig::default()
        },
        operations: 5000,
        seed: 11,
    };

    let err = run_stress(&options).unwrap_err();
    assert!(matches!(err, CliError::Gc(GcError::OutOfMemory { .. })));
}

/// Test: text reports carry the headline numbers
#[test]
fn test_stress_text_report() {
    let out = run(
        &cli(&["stress", "--operations", "300", "--seed", "4"]),
        &CliConfig::default(),
    )
    .unwrap();
    assert!(out.starts_with("seed 4 / 300 operations"));
    assert!(out.contains("collections"));
}
