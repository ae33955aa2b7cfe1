//! Run configuration for the scheduler.
//!
//! This module defines the configuration structure parameterizing a run. It
//! provides:
//! 1. **Defaults:** Baseline constants (quantum length, outstanding ceiling,
//!    allocation batch, telemetry cadence).
//! 2. **`RunConfig`:** The deserializable run document: cores, quantum shape,
//!    trace files, the static schedule, trash-thread parameters, and knobs.
//! 3. **Validation:** Eager startup checks; every violation is a fatal
//!    configuration error, never a warning.
//!
//! Configuration is supplied as JSON (see the CLI) or built in code with
//! `RunConfig::default()` plus field updates in tests.

use serde::Deserialize;

use crate::common::{SimError, ThreadId};

/// Default configuration constants.
mod defaults {
    /// Quantum length in cycles. One OS scheduling quantum at the simulated
    /// clock rate of the original trace captures.
    pub const QUANTUM_CYCLES: u64 = 2_666_667;

    /// Per-thread outstanding-transaction ceiling. A thread at the ceiling
    /// burns throttle cycles instead of issuing.
    pub const MAX_PENDING: u64 = 36;

    /// Pages handed out per allocator batch.
    pub const ALLOC_BATCH_PAGES: u64 = 16;

    /// Emit a progress line every this many completions.
    pub const PROGRESS_EVERY: u64 = 10_000;

    /// Also emit a progress line when this many cycles passed since the last.
    pub const CLOCK_DELAY: u64 = 1_000_000;

    /// Fraction of the engine cache the trash thread preallocates, percent.
    pub const TRASH_PERCENTAGE: u64 = 10;
}

/// Run configuration consumed by [`Scheduler::new`](crate::sched::Scheduler::new).
///
/// # Examples
///
/// ```
/// use memsched_core::config::RunConfig;
///
/// let json = r#"{
///     "cores": 2,
///     "quantum_cycles": 1000,
///     "trace_files": ["traces/a.txt", "traces/b.txt"],
///     "schedule": [[0, 1]]
/// }"#;
/// let config: RunConfig = serde_json::from_str(json).unwrap();
/// config.validate().unwrap();
/// assert_eq!(config.cores, 2);
/// assert_eq!(config.max_pending, 36);
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct RunConfig {
    /// Number of cores; each quantum runs one thread per core.
    #[serde(default = "RunConfig::default_cores")]
    pub cores: usize,

    /// Quantum length in cycles.
    #[serde(default = "RunConfig::default_quantum_cycles")]
    pub quantum_cycles: u64,

    /// Each schedule entry is used for this many consecutive quanta.
    #[serde(default = "RunConfig::default_quantum_repeat")]
    pub quantum_repeat: u64,

    /// Stop after this many quanta; 0 means unbounded.
    #[serde(default)]
    pub max_quanta: u64,

    /// One trace file per thread; thread ids index this list.
    pub trace_files: Vec<String>,

    /// Static schedule: one core-assignment array per quantum, cycled.
    /// Every entry must have exactly `cores` thread ids with no duplicates.
    pub schedule: Vec<Vec<ThreadId>>,

    /// Thread dedicated to cache trashing, if any.
    #[serde(default)]
    pub trash_thread: Option<ThreadId>,

    /// Fraction of total cache pages the trash thread preallocates (1–100).
    #[serde(default = "RunConfig::default_trash_percentage")]
    pub trash_percentage: u64,

    /// Enables the scheduler-driven prefetcher.
    #[serde(default = "RunConfig::default_prefetching")]
    pub prefetching: bool,

    /// Per-thread outstanding-transaction ceiling.
    #[serde(default = "RunConfig::default_max_pending")]
    pub max_pending: u64,

    /// Force a thread into its draining phase after this many progress
    /// cycles; 0 means unbounded.
    #[serde(default)]
    pub max_trace_cycles: u64,

    /// Pages handed out per allocator batch.
    #[serde(default = "RunConfig::default_alloc_batch_pages")]
    pub alloc_batch_pages: u64,

    /// Emit a progress line every this many completions.
    #[serde(default = "RunConfig::default_progress_every")]
    pub progress_every: u64,

    /// Also emit a progress line when this many cycles passed since the last.
    #[serde(default = "RunConfig::default_clock_delay")]
    pub clock_delay: u64,
}

impl RunConfig {
    fn default_cores() -> usize {
        1
    }

    fn default_quantum_cycles() -> u64 {
        defaults::QUANTUM_CYCLES
    }

    fn default_quantum_repeat() -> u64 {
        1
    }

    fn default_trash_percentage() -> u64 {
        defaults::TRASH_PERCENTAGE
    }

    fn default_prefetching() -> bool {
        true
    }

    fn default_max_pending() -> u64 {
        defaults::MAX_PENDING
    }

    fn default_alloc_batch_pages() -> u64 {
        defaults::ALLOC_BATCH_PAGES
    }

    fn default_progress_every() -> u64 {
        defaults::PROGRESS_EVERY
    }

    fn default_clock_delay() -> u64 {
        defaults::CLOCK_DELAY
    }

    /// Checks every startup invariant of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] naming the first violated rule:
    /// empty trace list or schedule, zero cores or quantum parameters,
    /// schedule entries whose length differs from the core count, duplicate
    /// or out-of-range thread ids within an entry, or invalid trash-thread
    /// parameters.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.cores == 0 {
            return Err(SimError::Config("core count must be at least 1".into()));
        }
        if self.quantum_cycles < 2 {
            return Err(SimError::Config(
                "quantum_cycles must be at least 2 (the prefetcher fires at the halfway point)"
                    .into(),
            ));
        }
        if self.quantum_repeat == 0 {
            return Err(SimError::Config("quantum_repeat must be at least 1".into()));
        }
        if self.trace_files.is_empty() {
            return Err(SimError::Config("no trace files configured".into()));
        }
        if self.schedule.is_empty() {
            return Err(SimError::Config("schedule is empty".into()));
        }
        if self.alloc_batch_pages == 0 {
            return Err(SimError::Config("alloc_batch_pages must be at least 1".into()));
        }
        if self.max_pending == 0 {
            return Err(SimError::Config("max_pending must be at least 1".into()));
        }
        for (i, entry) in self.schedule.iter().enumerate() {
            if entry.len() != self.cores {
                return Err(SimError::Config(format!(
                    "schedule entry {i} has {} slots for {} cores",
                    entry.len(),
                    self.cores
                )));
            }
            for (s, &tid) in entry.iter().enumerate() {
                if tid >= self.trace_files.len() {
                    return Err(SimError::Config(format!(
                        "schedule entry {i} slot {s} names thread {tid}, but only {} traces are configured",
                        self.trace_files.len()
                    )));
                }
                if entry[..s].contains(&tid) {
                    return Err(SimError::Config(format!(
                        "schedule entry {i} lists thread {tid} twice"
                    )));
                }
            }
        }
        if let Some(trash) = self.trash_thread {
            if trash >= self.trace_files.len() {
                return Err(SimError::Config(format!(
                    "trash thread {trash} is not a configured thread"
                )));
            }
            if self.trash_percentage == 0 || self.trash_percentage > 100 {
                return Err(SimError::Config(format!(
                    "trash_percentage {} is outside 1..=100",
                    self.trash_percentage
                )));
            }
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cores: 1,
            quantum_cycles: defaults::QUANTUM_CYCLES,
            quantum_repeat: 1,
            max_quanta: 0,
            trace_files: Vec::new(),
            schedule: Vec::new(),
            trash_thread: None,
            trash_percentage: defaults::TRASH_PERCENTAGE,
            prefetching: true,
            max_pending: defaults::MAX_PENDING,
            max_trace_cycles: 0,
            alloc_batch_pages: defaults::ALLOC_BATCH_PAGES,
            progress_every: defaults::PROGRESS_EVERY,
            clock_delay: defaults::CLOCK_DELAY,
        }
    }
}
