//! Scheduler main-loop, in-flight map, notify handling, and schedule-repair
//! tests.

use std::io;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use memsched_core::Scheduler;
use memsched_core::common::SimError;
use memsched_core::engine::EngineEvent;
use memsched_core::sched::RunState;

use crate::common::engine::TestEngine;
use crate::common::fixtures::{run_config, write_trace};

fn sink() -> Box<dyn io::Write> {
    Box::new(io::sink())
}

// ══════════════════════════════════════════════════════════
// 1. Translation isolation across threads
// ══════════════════════════════════════════════════════════

/// Two threads writing the same virtual address land on different physical
/// pages and are tracked under independent in-flight keys.
#[test]
fn same_virtual_address_different_threads_no_collision() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 1 0\n");
    let t1 = write_trace(&dir, "t1.txt", "0 1 0\n");
    let cfg = run_config(vec![t0, t1], 2, 50, vec![vec![0, 1]]);

    let engine = TestEngine::new(64, 1024, 32, 5);
    let handle = engine.handle();
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    assert!(s.step().unwrap());

    // Preallocation gave thread 0 batch pages 0..16 and thread 1 pages
    // 16..32, so virtual page 0 backs onto different physical pages.
    let submits = handle.borrow().submits.clone();
    assert_eq!(submits, vec![(true, 0), (true, 16 * 1024)]);
    assert_eq!(s.inflight_threads(0, true), vec![0]);
    assert_eq!(s.inflight_threads(16 * 1024, true), vec![1]);
}

// ══════════════════════════════════════════════════════════
// 2. In-flight FIFO
// ══════════════════════════════════════════════════════════

/// Two same-key submissions queue FIFO and both complete.
#[test]
fn same_key_inflight_resolves_fifo() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 1 0\n0 1 0\n");
    let cfg = run_config(vec![t0], 1, 50, vec![vec![0]]);

    let engine = TestEngine::new(64, 1024, 32, 5);
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    assert!(s.step().unwrap());
    assert!(s.step().unwrap());
    assert_eq!(s.inflight_threads(0, true), vec![0, 0]);

    while s.step().unwrap() {}
    assert_eq!(s.state(), RunState::Finished);
    assert_eq!(s.pending(), 0);
    assert_eq!(s.threads()[0].stats().completed, 2);
    assert!(s.inflight_threads(0, true).is_empty());
}

/// A completion for an address the scheduler never submitted is fatal.
#[test]
fn completion_for_unknown_key_is_fatal() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 0 0\n0 0 64\n");
    let cfg = run_config(vec![t0], 1, 50, vec![vec![0]]);

    let engine = TestEngine::new(64, 1024, 32, 40);
    let stray = engine.clone();
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    assert!(s.step().unwrap());
    // Something is pending now, so the stray completion reaches the
    // in-flight lookup and fails there.
    stray.inject(EngineEvent::Complete {
        is_write: false,
        addr: 55 * 1024,
        cycle: 1,
    });
    assert!(matches!(s.step(), Err(SimError::Protocol(_))));
}

// ══════════════════════════════════════════════════════════
// 3. Notify handling
// ══════════════════════════════════════════════════════════

/// An eviction of a validly mapped page reaches the owning thread.
#[test]
fn eviction_routes_to_owner() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 1 0\n");
    let cfg = run_config(vec![t0], 1, 50, vec![vec![0]]);

    let engine = TestEngine::new(64, 1024, 32, 5);
    let evictor = engine.clone();
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    // Preallocation mapped virtual page 0 onto physical page 0.
    evictor.inject(EngineEvent::Notify {
        op: 0,
        addr: 0,
        cycle: 0,
    });
    assert!(s.step().unwrap());
    assert_eq!(s.threads()[0].stats().evictions, 1);
    assert!(s.unmapped_evictions().is_empty());
}

/// An eviction of a reserved-but-unmapped page lands in the reconciliation
/// set instead of reaching any thread.
#[test]
fn eviction_of_unmapped_page_is_reconciled() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 0 0\n");
    let cfg = run_config(vec![t0], 1, 50, vec![vec![0]]);

    let engine = TestEngine::new(64, 1024, 32, 5);
    let evictor = engine.clone();
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    // Physical page 1024 was reserved by the preallocation batch but never
    // mapped (the trace only touches one page).
    assert!(!s.owners().get(&1024).unwrap().valid);
    evictor.inject(EngineEvent::Notify {
        op: 0,
        addr: 1024,
        cycle: 0,
    });
    assert!(s.step().unwrap());
    assert!(s.unmapped_evictions().contains(&1024));
    assert_eq!(s.threads()[0].stats().evictions, 0);
}

/// Any notify operation other than eviction is a protocol violation.
#[test]
fn unknown_notify_operation_is_fatal() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 0 0\n");
    let cfg = run_config(vec![t0], 1, 50, vec![vec![0]]);

    let engine = TestEngine::new(64, 1024, 32, 5);
    let notifier = engine.clone();
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    notifier.inject(EngineEvent::Notify {
        op: 7,
        addr: 0,
        cycle: 0,
    });
    assert!(matches!(s.step(), Err(SimError::Protocol(_))));
}

// ══════════════════════════════════════════════════════════
// 4. Accounting invariants
// ══════════════════════════════════════════════════════════

/// System pending equals issued minus completed at every observation point
/// and ends at zero.
#[test]
fn pending_accounting_holds_every_cycle() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 0 0\n1 1 2048\n3 0 0\n7 1 9000\n");
    let t1 = write_trace(&dir, "t1.txt", "0 1 512\n2 0 512\n5 0 40000\n");
    let cfg = run_config(vec![t0, t1], 2, 25, vec![vec![0, 1], vec![1, 0]]);

    let engine = TestEngine::new(128, 1024, 64, 6);
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    loop {
        let stepped = s.step().unwrap();
        let issued: u64 = s.threads().iter().map(|t| t.stats().issued).sum();
        let completed: u64 = s.threads().iter().map(|t| t.stats().completed).sum();
        assert_eq!(s.pending(), issued - completed);
        assert_eq!(s.completed(), completed);
        if !stepped {
            break;
        }
    }
    assert_eq!(s.pending(), 0);
    let issued: u64 = s.threads().iter().map(|t| t.stats().issued).sum();
    assert_eq!(s.completed(), issued);
}

// ══════════════════════════════════════════════════════════
// 5. Schedule selection and repair
// ══════════════════════════════════════════════════════════

/// The running set follows the schedule table quantum by quantum.
#[test]
fn running_set_follows_schedule() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 0 0\n20 0 0\n40 0 0\n");
    let t1 = write_trace(&dir, "t1.txt", "0 0 0\n20 0 0\n40 0 0\n");
    let cfg = run_config(vec![t0, t1], 1, 10, vec![vec![0], vec![1]]);

    let engine = TestEngine::new(128, 1024, 64, 2);
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    assert!(s.step().unwrap());
    assert_eq!(s.running(), &[0]);
    for _ in 0..10 {
        assert!(s.step().unwrap());
    }
    assert_eq!(s.running(), &[1]);
}

/// Slots of finished threads are reassigned to the lowest unfinished thread,
/// and repair is idempotent.
#[test]
fn clean_schedule_substitutes_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 0 0\n");
    let long_body: String = (0..40).map(|i| format!("{i} 0 {}\n", i * 64)).collect();
    let t1 = write_trace(&dir, "t1.txt", &long_body);
    let t2 = write_trace(&dir, "t2.txt", &long_body);
    let cfg = run_config(
        vec![t0, t1, t2],
        1,
        10,
        vec![vec![0], vec![1], vec![2]],
    );

    let engine = TestEngine::new(256, 1024, 128, 2);
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    // Run thread 0's quantum to the end; its single record completes well
    // within it.
    for _ in 0..=10 {
        assert!(s.step().unwrap());
    }
    assert!(s.threads()[0].is_done());

    s.clean_schedule();
    let once = s.schedule().to_vec();
    assert_eq!(once[0], vec![1], "lowest unfinished thread replaces thread 0");
    s.clean_schedule();
    assert_eq!(s.schedule(), &once[..], "repair is idempotent");
}

/// The quantum bound stops the run even with work left.
#[test]
fn max_quanta_bounds_the_run() {
    let dir = TempDir::new().unwrap();
    let long_body: String = (0..200).map(|i| format!("{} 0 {}\n", i * 5, i * 64)).collect();
    let t0 = write_trace(&dir, "t0.txt", &long_body);
    let mut cfg = run_config(vec![t0], 1, 10, vec![vec![0]]);
    cfg.max_quanta = 2;

    let engine = TestEngine::new(256, 1024, 128, 2);
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    let summary = s.run().unwrap();
    assert_eq!(summary.quanta, 2);
    assert_eq!(summary.cycles, 20);
    assert_eq!(s.state(), RunState::Finished);
}

// ══════════════════════════════════════════════════════════
// 6. Trash thread
// ══════════════════════════════════════════════════════════

/// The trash thread preallocates its reserved slice of the cache, folds all
/// of its traffic into that block, and stays out of the classification
/// statistics.
#[test]
fn trash_thread_reserves_block_and_folds_traffic() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 0 0\n");
    let t1 = write_trace(&dir, "t1.txt", "0 1 100000\n5 1 200000\n");
    let mut cfg = run_config(vec![t0, t1], 2, 50, vec![vec![0, 1]]);
    cfg.trash_thread = Some(1);
    cfg.trash_percentage = 10;

    // cache_pages 40 → the trash block is 4 pages.
    let engine = TestEngine::new(256, 1024, 40, 5);
    let handle = engine.handle();
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    assert!(s.threads()[1].is_trash());
    assert_eq!(s.threads()[1].working_set_pages(), 4);

    assert!(s.step().unwrap());
    // Thread 0's batch took pages 0..16, so the trash block is pages 16..20.
    // 100000 folds to offset 1696 in the block: page 17, offset 672.
    let submits = handle.borrow().submits.clone();
    assert!(submits.contains(&(true, 17 * 1024 + 672)), "{submits:?}");

    let trash_stats = s.threads()[1].stats();
    assert_eq!(trash_stats.issued, 1);
    assert_eq!(
        trash_stats.misses
            + trash_stats.prefetch_hits
            + trash_stats.prefetch_cached_hits
            + trash_stats.nonprefetch_hits,
        0,
        "trash traffic is excluded from classification"
    );
}

/// A full run retires every trace record exactly once.
#[test]
fn run_retires_every_record() {
    let dir = TempDir::new().unwrap();
    let t0 = write_trace(&dir, "t0.txt", "0 0 0\n1 1 64\n2 0 128\n");
    let t1 = write_trace(&dir, "t1.txt", "0 1 0\n4 0 4096\n");
    let cfg = run_config(vec![t0, t1], 2, 30, vec![vec![0, 1]]);

    let engine = TestEngine::new(128, 1024, 64, 3);
    let mut s = Scheduler::new(cfg, Box::new(engine), sink()).unwrap();

    let summary = s.run().unwrap();
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.pending, 0);
    assert_eq!(s.threads()[0].stats().issued, 3);
    assert_eq!(s.threads()[1].stats().issued, 2);
    assert!(s.threads().iter().all(memsched_core::thread::TraceThread::is_done));
}
