//! Scheduler-driven prefetcher.
//!
//! Prefetching here is not address prediction: a thread's next quantum is
//! known from the schedule, and the pages it touched the last time it ran
//! are a good bet for the next time. The prefetcher keeps one live touch-set
//! per thread while it runs, archives it at the quantum boundary, and — at
//! the halfway point of each quantum — pushes the archived set of every
//! thread scheduled next into the engine, early enough for the fills to land
//! before the thread resumes.
//!
//! The trash thread is special-cased: its job is to re-trash the same
//! reserved region every time it runs, so it is prefetched from its *first*
//! recorded touch-set at quantum start, with the trash mmio op.

use std::collections::HashMap;

use crate::common::{SimError, ThreadId};
use crate::engine::{MMIO_PREFETCH, MMIO_TRASH_PREFETCH, MemoryEngine};
use crate::sched::PageOwner;
use crate::thread::TraceThread;

/// Touch-set bookkeeping and prefetch issue for the quantum scheduler.
#[derive(Debug)]
pub struct SchedulerPrefetcher {
    page_size: u64,
    /// Remaining-cycle count at which the halfway hook fires.
    half_point: u64,
    trash_thread: Option<ThreadId>,
    /// Live touch-set per thread: physical page number to touch count.
    /// Not reset until the thread's next quantum boundary.
    live: Vec<HashMap<u64, u64>>,
    /// Archived touch-sets per thread, append-only, one per completed
    /// running interval.
    history: Vec<Vec<HashMap<u64, u64>>>,
}

impl SchedulerPrefetcher {
    /// Creates the prefetcher for `num_threads` threads.
    pub fn new(
        num_threads: usize,
        page_size: u64,
        quantum_cycles: u64,
        trash_thread: Option<ThreadId>,
    ) -> Self {
        Self {
            page_size,
            half_point: quantum_cycles / 2,
            trash_thread,
            live: vec![HashMap::new(); num_threads],
            history: vec![Vec::new(); num_threads],
        }
    }

    /// Records a touch of `addr` (physical) for `thread`.
    pub fn add_transaction(&mut self, thread: ThreadId, addr: u64) {
        let page = addr / self.page_size;
        *self.live[thread].entry(page).or_insert(0) += 1;
    }

    /// True when `thread` already touched `addr`'s page during its current
    /// running interval. Used to split the classification statistics into
    /// first-vs-repeat accesses.
    pub fn was_touched_this_quantum(&self, thread: ThreadId, addr: u64) -> bool {
        self.live[thread].contains_key(&(addr / self.page_size))
    }

    /// Archived touch-sets of `thread`, oldest first.
    pub fn archived(&self, thread: ThreadId) -> &[HashMap<u64, u64>] {
        &self.history[thread]
    }

    /// Quantum-boundary bookkeeping: archives and clears the touch-set of
    /// every thread that just finished running. When the trash thread is in
    /// the upcoming set, its block is prefetched immediately from its first
    /// recorded touch-set — it always re-trashes the same region, however
    /// many quanta have passed.
    pub fn on_quantum_start(
        &mut self,
        last_running: &[ThreadId],
        next_running: &[ThreadId],
        threads: &mut [TraceThread],
        engine: &mut dyn MemoryEngine,
    ) {
        for &t in last_running {
            let set = std::mem::take(&mut self.live[t]);
            self.history[t].push(set);
        }
        if let Some(trash) = self.trash_thread {
            if next_running.contains(&trash) {
                if let Some(first) = self.history[trash].first() {
                    let mut pages: Vec<u64> = first.keys().copied().collect();
                    pages.sort_unstable();
                    for page in pages {
                        engine.mmio(MMIO_TRASH_PREFETCH, page * self.page_size);
                        threads[trash].note_trash_prefetch();
                    }
                }
            }
        }
    }

    /// Per-cycle hook; fires the halfway prefetch pass when the remaining
    /// cycle count crosses exactly half the quantum length.
    ///
    /// # Errors
    ///
    /// Propagates page-state protocol violations from the owning threads.
    pub fn on_cycle(
        &mut self,
        cycles_left: u64,
        next_running: &[ThreadId],
        threads: &mut [TraceThread],
        owners: &HashMap<u64, PageOwner>,
        engine: &mut dyn MemoryEngine,
    ) -> Result<(), SimError> {
        if cycles_left != self.half_point {
            return Ok(());
        }
        self.issue_for_next(next_running, threads, owners, engine)
    }

    /// Issues one engine prefetch per distinct page in the most recently
    /// archived touch-set of every thread scheduled next (except the trash
    /// thread, which is handled at quantum start).
    fn issue_for_next(
        &mut self,
        next_running: &[ThreadId],
        threads: &mut [TraceThread],
        owners: &HashMap<u64, PageOwner>,
        engine: &mut dyn MemoryEngine,
    ) -> Result<(), SimError> {
        for &t in next_running {
            if self.trash_thread == Some(t) {
                continue;
            }
            let Some(set) = self.history[t].last() else {
                continue;
            };
            let mut pages: Vec<u64> = set.keys().copied().collect();
            pages.sort_unstable();
            for page in pages {
                let addr = page * self.page_size;
                engine.mmio(MMIO_PREFETCH, addr);
                if let Some(owner) = owners.get(&addr) {
                    if owner.valid && owner.thread == t {
                        threads[t].mark_prefetched(owner.vpage)?;
                    }
                }
            }
        }
        Ok(())
    }
}
