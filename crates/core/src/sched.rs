//! Quantum scheduler.
//!
//! The scheduler is the top-level driver: it owns the simulated clock, the
//! static core×quantum schedule, the trace threads, the page allocator and
//! ownership table, the in-flight transaction map, and the prefetcher, and
//! it drives the memory engine one cycle at a time.
//!
//! Shared-resource discipline: every table here is mutated only on this
//! single control path. Threads get at shared state exclusively through a
//! [`SchedContext`] borrowing the individual tables for one call, which is
//! what lets the borrow checker prove the ownership story the design relies
//! on — no locks, because there is nothing concurrent to lock against.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;

use crate::alloc::PageAllocator;
use crate::common::{PhysAddr, SimError, ThreadId};
use crate::config::RunConfig;
use crate::engine::{EngineEvent, MemoryEngine, MemoryGeometry, NOTIFY_EVICT};
use crate::prefetch::SchedulerPrefetcher;
use crate::report::Reporter;
use crate::thread::{ThreadOptions, TraceThread};
use crate::trace::{TraceMapCache, TraceReader};

/// Ownership record of one physical page.
///
/// Created invalid when the allocator reserves the page for a thread;
/// flipped valid exactly once, when that thread maps a virtual page onto it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageOwner {
    /// Thread the page was reserved for.
    pub thread: ThreadId,
    /// Virtual page mapped onto this physical page; meaningless while
    /// `valid` is false.
    pub vpage: u64,
    /// False while the page is only reserved, true once mapped.
    pub valid: bool,
}

/// System-wide running counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalCounters {
    /// Transactions in flight across all threads.
    pub pending: u64,
    /// Transactions completed across all threads.
    pub complete: u64,
    /// Throttle cycles burned across all threads.
    pub throttle_cycles: u64,
    /// Engine cycle of the last progress line.
    pub last_clock: u64,
}

/// Scheduler lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// The main loop is still advancing cycles.
    Running,
    /// Every thread is done and nothing is in flight (or the quantum bound
    /// was reached).
    Finished,
}

/// Final run totals returned by [`Scheduler::run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Total simulated cycles.
    pub cycles: u64,
    /// Quanta started.
    pub quanta: u64,
    /// Transactions completed system-wide.
    pub completed: u64,
    /// Transactions still pending at exit; nonzero only with a quantum bound.
    pub pending: u64,
}

/// Borrowed view of the scheduler's shared state, handed to a thread for the
/// duration of one call. Keeping the tables split per field is what allows a
/// thread to be borrowed mutably alongside them.
pub struct SchedContext<'a> {
    /// The memory engine.
    pub engine: &'a mut dyn MemoryEngine,
    /// The process-wide page allocator.
    pub alloc: &'a mut PageAllocator,
    /// The prefetcher (touch-set recording and queries).
    pub prefetcher: &'a mut SchedulerPrefetcher,
    /// In-flight map: (physical address, direction) to FIFO of thread ids.
    pub inflight: &'a mut HashMap<(u64, bool), VecDeque<ThreadId>>,
    /// Physical-page ownership table, keyed by page-aligned address.
    pub owners: &'a mut HashMap<u64, PageOwner>,
    /// Pages evicted by the engine before any thread mapped them.
    pub unmapped: &'a mut HashSet<u64>,
    /// System-wide counters.
    pub totals: &'a mut GlobalCounters,
    /// Engine-reported address-space shape.
    pub geometry: &'a MemoryGeometry,
}

impl std::fmt::Debug for SchedContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedContext")
            .field("inflight_keys", &self.inflight.len())
            .field("owned_pages", &self.owners.len())
            .finish()
    }
}

impl SchedContext<'_> {
    /// Allocates a fresh batch for `thread`, registering every page as
    /// reserved-but-invalid in the ownership table.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] on physical exhaustion or if a page
    /// address comes back twice.
    pub fn new_alloc(&mut self, thread: ThreadId) -> Result<Vec<PhysAddr>, SimError> {
        let batch = self.alloc.allocate_batch()?;
        self.register_reserved(thread, &batch)?;
        Ok(batch)
    }

    /// Allocates an exact block for `thread` (trash-block reservation).
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::new_alloc`].
    pub fn new_alloc_exact(
        &mut self,
        thread: ThreadId,
        pages: u64,
    ) -> Result<Vec<PhysAddr>, SimError> {
        let block = self.alloc.allocate_exact(pages)?;
        self.register_reserved(thread, &block)?;
        Ok(block)
    }

    /// Flips a reserved page to valid for `thread`/`vpage`. Returns whether
    /// the page had been evicted before it was mapped, consuming the
    /// unmapped-eviction entry.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] when the page was never reserved, was
    /// reserved by another thread, or is already mapped.
    pub fn register_mapping(
        &mut self,
        page: PhysAddr,
        thread: ThreadId,
        vpage: u64,
    ) -> Result<bool, SimError> {
        let owner = self.owners.get_mut(&page.val()).ok_or_else(|| {
            SimError::Protocol(format!(
                "thread {thread} mapped physical page {:#x} that was never reserved",
                page.val()
            ))
        })?;
        if owner.valid {
            return Err(SimError::Protocol(format!(
                "physical page {:#x} mapped twice (threads {} and {thread})",
                page.val(),
                owner.thread
            )));
        }
        if owner.thread != thread {
            return Err(SimError::Protocol(format!(
                "thread {thread} mapped physical page {:#x} reserved for thread {}",
                page.val(),
                owner.thread
            )));
        }
        owner.vpage = vpage;
        owner.valid = true;
        Ok(self.unmapped.remove(&page.val()))
    }

    /// Registers a new transaction for `thread` and submits it to the
    /// engine. Same-key submissions queue FIFO behind each other.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] if the engine refuses the transaction;
    /// backpressure belongs in the per-thread ceiling, not here.
    pub fn add_transaction(
        &mut self,
        thread: ThreadId,
        is_write: bool,
        addr: PhysAddr,
    ) -> Result<(), SimError> {
        self.inflight
            .entry((addr.val(), is_write))
            .or_default()
            .push_back(thread);
        self.prefetcher.add_transaction(thread, addr.val());
        self.totals.pending += 1;
        if !self.engine.submit(is_write, addr) {
            return Err(SimError::Protocol(format!(
                "engine refused {} to {:#x} from thread {thread}",
                if is_write { "write" } else { "read" },
                addr.val()
            )));
        }
        Ok(())
    }

    fn register_reserved(
        &mut self,
        thread: ThreadId,
        pages: &[PhysAddr],
    ) -> Result<(), SimError> {
        for page in pages {
            let previous = self.owners.insert(
                page.val(),
                PageOwner {
                    thread,
                    vpage: 0,
                    valid: false,
                },
            );
            if previous.is_some() {
                return Err(SimError::Protocol(format!(
                    "physical page {:#x} allocated twice",
                    page.val()
                )));
            }
        }
        Ok(())
    }
}

/// The quantum scheduler.
pub struct Scheduler {
    engine: Box<dyn MemoryEngine>,
    geometry: MemoryGeometry,
    cfg: RunConfig,

    threads: Vec<TraceThread>,
    alloc: PageAllocator,
    prefetcher: SchedulerPrefetcher,

    inflight: HashMap<(u64, bool), VecDeque<ThreadId>>,
    owners: HashMap<u64, PageOwner>,
    unmapped_evictions: HashSet<u64>,

    /// Working copy of the static schedule; repaired in place as threads
    /// finish early.
    schedule: Vec<Vec<ThreadId>>,
    running: Vec<ThreadId>,
    quanta_started: u64,
    cycles_left: u64,
    cycle: u64,

    totals: GlobalCounters,
    report: Reporter,
    state: RunState,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("cycle", &self.cycle)
            .field("quanta_started", &self.quanta_started)
            .field("pending", &self.totals.pending)
            .field("state", &self.state)
            .finish()
    }
}

impl Scheduler {
    /// Builds a scheduler: validates the configuration, resolves the memory
    /// geometry from the engine, opens every trace, runs the preallocation
    /// dry runs, and reports each thread's working-set size.
    ///
    /// # Errors
    ///
    /// Returns configuration, I/O, trace-format, or allocation errors.
    pub fn new(
        cfg: RunConfig,
        mut engine: Box<dyn MemoryEngine>,
        log: Box<dyn Write>,
    ) -> Result<Self, SimError> {
        cfg.validate()?;
        let geometry = MemoryGeometry::resolve(engine.as_mut());
        let alloc = PageAllocator::new(&geometry, cfg.alloc_batch_pages);
        let prefetcher = SchedulerPrefetcher::new(
            cfg.trace_files.len(),
            geometry.page_size,
            cfg.quantum_cycles,
            cfg.trash_thread,
        );
        let opts = ThreadOptions {
            max_pending: cfg.max_pending,
            max_trace_cycles: cfg.max_trace_cycles,
        };
        let mut threads = Vec::with_capacity(cfg.trace_files.len());
        for (id, path) in cfg.trace_files.iter().enumerate() {
            let reader = TraceReader::open(path)?;
            threads.push(TraceThread::new(id, path, reader, &opts)?);
        }
        let schedule = cfg.schedule.clone();
        let mut sched = Self {
            engine,
            geometry,
            cfg,
            threads,
            alloc,
            prefetcher,
            inflight: HashMap::new(),
            owners: HashMap::new(),
            unmapped_evictions: HashSet::new(),
            schedule,
            running: Vec::new(),
            quanta_started: 0,
            cycles_left: 0,
            cycle: 0,
            totals: GlobalCounters::default(),
            report: Reporter::new(log),
            state: RunState::Running,
        };
        sched.preallocate_all()?;
        Ok(sched)
    }

    /// Runs the main loop to completion and emits the final summary.
    ///
    /// # Errors
    ///
    /// Propagates every fatal condition from the loop.
    pub fn run(&mut self) -> Result<RunSummary, SimError> {
        while self.step()? {}
        self.report.final_summary(&self.threads)?;
        self.report.flush()?;
        Ok(RunSummary {
            cycles: self.cycle,
            quanta: self.quanta_started,
            completed: self.totals.complete,
            pending: self.totals.pending,
        })
    }

    /// Advances one simulated cycle. Returns `false` once finished.
    ///
    /// # Errors
    ///
    /// Propagates trace, allocation, and protocol errors.
    pub fn step(&mut self) -> Result<bool, SimError> {
        if self.state == RunState::Finished {
            return Ok(false);
        }
        if self.cycles_left == 0 {
            self.quantum_rollover()?;
            if self.state == RunState::Finished {
                return Ok(false);
            }
        }

        let running = self.running.clone();
        for tid in running {
            self.advance_thread(tid)?;
        }

        for event in self.engine.advance() {
            self.dispatch(event)?;
        }

        if self.cfg.prefetching {
            let next = self.assignment_for(self.quanta_started);
            self.prefetcher.on_cycle(
                self.cycles_left,
                &next,
                &mut self.threads,
                &self.owners,
                self.engine.as_mut(),
            )?;
        }

        self.cycle += 1;
        self.cycles_left -= 1;
        Ok(true)
    }

    /// Repairs the schedule in place: any slot naming an already-finished
    /// thread is reassigned to the lowest-numbered unfinished thread not
    /// already present in that slot's quantum. Idempotent between thread
    /// finishes.
    pub fn clean_schedule(&mut self) {
        let finished: Vec<bool> = self.threads.iter().map(TraceThread::is_done).collect();
        for entry in &mut self.schedule {
            for slot in 0..entry.len() {
                if finished[entry[slot]] {
                    let candidate = (0..finished.len())
                        .find(|&c| !finished[c] && !entry.contains(&c));
                    if let Some(c) = candidate {
                        entry[slot] = c;
                    }
                }
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Simulated cycles elapsed.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Quanta started so far.
    pub fn quanta_started(&self) -> u64 {
        self.quanta_started
    }

    /// Transactions in flight system-wide.
    pub fn pending(&self) -> u64 {
        self.totals.pending
    }

    /// Transactions completed system-wide.
    pub fn completed(&self) -> u64 {
        self.totals.complete
    }

    /// All threads, in id order.
    pub fn threads(&self) -> &[TraceThread] {
        &self.threads
    }

    /// The current quantum's running set.
    pub fn running(&self) -> &[ThreadId] {
        &self.running
    }

    /// The (possibly repaired) schedule table.
    pub fn schedule(&self) -> &[Vec<ThreadId>] {
        &self.schedule
    }

    /// The physical-page ownership table.
    pub fn owners(&self) -> &HashMap<u64, PageOwner> {
        &self.owners
    }

    /// Pages evicted before any thread mapped them.
    pub fn unmapped_evictions(&self) -> &HashSet<u64> {
        &self.unmapped_evictions
    }

    /// Thread ids queued under one in-flight key, FIFO order.
    pub fn inflight_threads(&self, addr: u64, is_write: bool) -> Vec<ThreadId> {
        self.inflight
            .get(&(addr, is_write))
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    fn preallocate_all(&mut self) -> Result<(), SimError> {
        let mut cache = TraceMapCache::new();
        for tid in 0..self.threads.len() {
            let mapped = if self.cfg.trash_thread == Some(tid) {
                let block =
                    ((self.geometry.cache_pages * self.cfg.trash_percentage) / 100).max(1);
                let mut ctx = SchedContext {
                    engine: self.engine.as_mut(),
                    alloc: &mut self.alloc,
                    prefetcher: &mut self.prefetcher,
                    inflight: &mut self.inflight,
                    owners: &mut self.owners,
                    unmapped: &mut self.unmapped_evictions,
                    totals: &mut self.totals,
                    geometry: &self.geometry,
                };
                self.threads[tid].preallocate_trash(&mut ctx, block)?
            } else {
                let path = self.threads[tid].path().to_string();
                let vpages = cache.pages_for(&path, &self.geometry)?;
                let mut ctx = SchedContext {
                    engine: self.engine.as_mut(),
                    alloc: &mut self.alloc,
                    prefetcher: &mut self.prefetcher,
                    inflight: &mut self.inflight,
                    owners: &mut self.owners,
                    unmapped: &mut self.unmapped_evictions,
                    totals: &mut self.totals,
                    geometry: &self.geometry,
                };
                self.threads[tid].preallocate(&mut ctx, &vpages)?
            };
            self.report.memory_map(tid, mapped)?;
        }
        Ok(())
    }

    fn advance_thread(&mut self, tid: ThreadId) -> Result<(), SimError> {
        let mut ctx = SchedContext {
            engine: self.engine.as_mut(),
            alloc: &mut self.alloc,
            prefetcher: &mut self.prefetcher,
            inflight: &mut self.inflight,
            owners: &mut self.owners,
            unmapped: &mut self.unmapped_evictions,
            totals: &mut self.totals,
            geometry: &self.geometry,
        };
        self.threads[tid].advance(&mut ctx)
    }

    fn dispatch(&mut self, event: EngineEvent) -> Result<(), SimError> {
        match event {
            EngineEvent::Complete {
                is_write,
                addr,
                cycle,
            } => self.on_complete(is_write, addr, cycle),
            EngineEvent::Notify { op, addr, cycle: _ } => self.on_notify(op, addr),
        }
    }

    fn on_complete(&mut self, is_write: bool, addr: u64, cycle: u64) -> Result<(), SimError> {
        if self.totals.pending == 0 {
            return Err(SimError::Protocol(format!(
                "completion for {addr:#x} with nothing pending"
            )));
        }
        self.totals.pending -= 1;
        self.totals.complete += 1;

        if self.totals.complete % self.cfg.progress_every == 0
            || cycle.saturating_sub(self.totals.last_clock) > self.cfg.clock_delay
        {
            tracing::info!(
                complete = self.totals.complete,
                pending = self.totals.pending,
                cycle,
                throttle_cycles = self.totals.throttle_cycles,
                "progress"
            );
            self.totals.last_clock = cycle;
        }

        let key = (addr, is_write);
        let queue = self.inflight.get_mut(&key).ok_or_else(|| {
            SimError::Protocol(format!(
                "completion for {} to {addr:#x} not in the in-flight map",
                if is_write { "write" } else { "read" }
            ))
        })?;
        let tid = queue.pop_front().ok_or_else(|| {
            SimError::Protocol(format!("empty in-flight queue for {addr:#x}"))
        })?;
        if queue.is_empty() {
            let _ = self.inflight.remove(&key);
        }
        self.threads[tid].transaction_complete()
    }

    fn on_notify(&mut self, op: u64, addr: u64) -> Result<(), SimError> {
        if op != NOTIFY_EVICT {
            return Err(SimError::Protocol(format!(
                "unknown notify operation {op} for {addr:#x}"
            )));
        }
        let page = PhysAddr::new(addr).page_base(self.geometry.page_size);
        match self.owners.get(&page) {
            Some(owner) if owner.valid => {
                let (tid, vpage) = (owner.thread, owner.vpage);
                self.threads[tid].page_evicted(vpage)
            }
            // Reserved-but-unmapped (or never-allocated prefill) pages land
            // in the reconciliation set; the mapping path consumes the entry
            // so a freshly mapped page is not assumed resident.
            _ => {
                let _ = self.unmapped_evictions.insert(page);
                Ok(())
            }
        }
    }

    fn quantum_rollover(&mut self) -> Result<(), SimError> {
        let bounded_out =
            self.cfg.max_quanta > 0 && self.quanta_started >= self.cfg.max_quanta;
        let all_done =
            self.threads.iter().all(TraceThread::is_done) && self.totals.pending == 0;
        if bounded_out || all_done {
            if self.quanta_started > 0 {
                self.report.quantum_stats(&self.running, &self.threads)?;
            }
            self.state = RunState::Finished;
            return Ok(());
        }

        self.report.quantum_banner(self.quanta_started, self.cycle)?;
        if self.quanta_started > 0 {
            self.report.quantum_stats(&self.running, &self.threads)?;
        }

        self.clean_schedule();
        let next = self.assignment_for(self.quanta_started);
        let prev = std::mem::replace(&mut self.running, next);
        let next_copy = self.running.clone();
        self.prefetcher.on_quantum_start(
            &prev,
            &next_copy,
            &mut self.threads,
            self.engine.as_mut(),
        );
        for &t in &prev {
            self.threads[t].reset_quantum_stats();
        }

        tracing::debug!(
            quantum = self.quanta_started,
            cycle = self.cycle,
            running = ?self.running,
            "starting quantum"
        );
        self.quanta_started += 1;
        self.cycles_left = self.cfg.quantum_cycles;
        Ok(())
    }

    fn assignment_for(&self, quantum: u64) -> Vec<ThreadId> {
        let idx = ((quantum / self.cfg.quantum_repeat) as usize) % self.schedule.len();
        self.schedule[idx].clone()
    }
}
