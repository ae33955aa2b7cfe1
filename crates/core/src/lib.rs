//! Trace-driven multi-core memory-access scheduler library.
//!
//! This crate replays per-thread memory traces against a hybrid memory
//! subsystem, with the following pieces:
//! 1. **Scheduler:** Quantum-based round-robin over a fixed core count,
//!    driven one simulated cycle at a time.
//! 2. **Threads:** Per-trace state machines with private page tables,
//!    outstanding-transaction throttling, and access classification.
//! 3. **Memory:** A bump page allocator over a shared physical space and an
//!    eviction-aware unmapped-page reconciliation scheme.
//! 4. **Prefetch:** A scheduler-driven prefetcher pushing each thread's
//!    previously-touched pages into the engine ahead of its next quantum.
//! 5. **Engine interface:** The narrow submit/advance/query/mmio contract to
//!    the external memory-timing engine, plus a deterministic reference
//!    implementation.

/// Physical page allocator.
pub mod alloc;
/// Common types (addresses, thread ids, errors).
pub mod common;
/// Run configuration (defaults, validation).
pub mod config;
/// Memory engine interface, events, geometry, and the reference engine.
pub mod engine;
/// Scheduler-driven prefetcher.
pub mod prefetch;
/// Run-log emission.
pub mod report;
/// Quantum scheduler.
pub mod sched;
/// Per-thread statistics.
pub mod stats;
/// Trace-replaying threads.
pub mod thread;
/// Trace parsing and the preallocation cache.
pub mod trace;

/// Root configuration type; deserialize from JSON or use field updates on
/// `RunConfig::default()`.
pub use crate::config::RunConfig;
/// The external memory-timing engine contract.
pub use crate::engine::MemoryEngine;
/// Top-level driver; construct with `Scheduler::new` and call `run`.
pub use crate::sched::Scheduler;
