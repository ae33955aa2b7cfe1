//! Run-log format tests.
//!
//! The phrases asserted here are a de facto interface for offline analysis
//! tooling; a failure in this file means downstream parsers break.

use tempfile::TempDir;

use memsched_core::Scheduler;

use crate::common::engine::TestEngine;
use crate::common::fixtures::{SharedLog, run_config, write_trace};

/// A complete run emits the startup map lines, quantum banners, per-quantum
/// blocks, and the final summary in the stable line-oriented shape.
#[test]
fn run_log_keeps_the_stable_shape() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 1 0\n1 0 1024\n");
    let cfg = run_config(vec![t0.clone()], 1, 10, vec![vec![0]]);

    let engine = TestEngine::new(64, 1024, 32, 2);
    let log = SharedLog::default();
    let mut s = Scheduler::new(cfg, Box::new(engine), Box::new(log.clone())).unwrap();
    s.run().unwrap();

    let text = log.contents();
    assert!(
        text.contains("Thread 0 has a memory map of size 2"),
        "missing memory-map line:\n{text}"
    );
    assert!(text.contains("Starting quantum 0 at cycle 0"), "{text}");
    assert!(text.contains("Data for threads that just ran:"), "{text}");
    assert!(text.contains("thread_id 0"), "{text}");
    assert!(text.contains("done_threads 1"), "{text}");
    assert!(text.contains("Completed transactions:"), "{text}");
    assert!(text.contains("thread 0"), "{text}");
    assert!(text.contains(&format!("tracefile {t0}")), "{text}");
    assert!(text.contains("complete 2"), "{text}");
}

/// Every statistics line is a `<field> <value>` pair under its header.
#[test]
fn stats_blocks_are_field_value_pairs() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 0 0\n");
    let cfg = run_config(vec![t0], 1, 10, vec![vec![0]]);

    let engine = TestEngine::new(64, 1024, 32, 2);
    let log = SharedLog::default();
    let mut s = Scheduler::new(cfg, Box::new(engine), Box::new(log.clone())).unwrap();
    s.run().unwrap();

    let text = log.contents();
    let mut in_block = false;
    for line in text.lines() {
        if line.starts_with("thread_id ") || line.starts_with("tracefile ") {
            in_block = true;
            continue;
        }
        if line.is_empty() {
            in_block = false;
            continue;
        }
        if in_block {
            let fields: Vec<&str> = line.split_whitespace().collect();
            assert_eq!(fields.len(), 2, "not a field/value pair: {line:?}");
            assert!(
                fields[1].parse::<u64>().is_ok(),
                "value is not numeric: {line:?}"
            );
        }
    }
}
