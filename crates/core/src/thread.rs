//! Trace-replaying thread.
//!
//! A `TraceThread` owns one trace stream, its private virtual page table,
//! and its statistics. It moves through three phases: *issuing* while the
//! trace still has records, *draining* once the trace is exhausted but
//! transactions are outstanding, and *done* when nothing is left in flight.
//!
//! The thread never touches shared scheduler state directly; everything it
//! needs from the outside world (allocator batches, ownership registration,
//! transaction submission, touch-set queries) goes through the
//! [`SchedContext`] handed to it for the duration of one call.

use std::collections::{HashMap, VecDeque};

use crate::common::{PhysAddr, SimError, ThreadId, VirtAddr};
use crate::engine::MemoryGeometry;
use crate::sched::SchedContext;
use crate::stats::{AccessClass, ThreadStats};
use crate::trace::{TraceReader, TraceRecord};

/// Per-page state bits, reset to all-false on eviction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageFlags {
    /// A prefetch landed on this page and it has not been accessed since.
    pub prefetched: bool,
    /// The page has been accessed since it was mapped or last evicted.
    pub accessed: bool,
    /// The page has been written since it was mapped or last evicted.
    pub dirty: bool,
    /// A prefetch was attempted on this page at least once since the last
    /// eviction, whether or not it set the `prefetched` bit.
    pub prefetch_attempted: bool,
}

/// One virtual-page mapping: backing physical page plus state bits.
#[derive(Clone, Copy, Debug)]
pub struct PageEntry {
    /// Page-aligned physical backing address.
    pub phys: PhysAddr,
    /// Current state bits.
    pub flags: PageFlags,
}

/// Lifecycle phase of a trace thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Reading and emitting transactions.
    Issuing,
    /// Trace exhausted, transactions still pending.
    Draining,
    /// Trace exhausted and nothing in flight.
    Done,
}

/// Construction options for a [`TraceThread`].
#[derive(Clone, Copy, Debug)]
pub struct ThreadOptions {
    /// Outstanding-transaction ceiling.
    pub max_pending: u64,
    /// Force draining after this many progress cycles; 0 = unbounded.
    pub max_trace_cycles: u64,
}

/// A thread replaying one memory trace.
pub struct TraceThread {
    id: ThreadId,
    path: String,
    reader: Option<TraceReader>,
    next_record: Option<TraceRecord>,
    phase: Phase,

    page_table: HashMap<u64, PageEntry>,
    free_pages: VecDeque<PhysAddr>,
    /// Set for the trash thread only: all addresses fold into a reserved
    /// block of this many pages.
    trash_block_pages: Option<u64>,

    pending: u64,
    max_pending: u64,
    max_trace_cycles: u64,
    stats: ThreadStats,
}

impl std::fmt::Debug for TraceThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceThread")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("phase", &self.phase)
            .field("pending", &self.pending)
            .field("pages", &self.page_table.len())
            .finish()
    }
}

impl TraceThread {
    /// Creates a thread over `reader`, priming the first record.
    ///
    /// An empty trace leaves the thread immediately done.
    ///
    /// # Errors
    ///
    /// Propagates parse errors from the first record.
    pub fn new(
        id: ThreadId,
        path: &str,
        mut reader: TraceReader,
        opts: &ThreadOptions,
    ) -> Result<Self, SimError> {
        let next_record = reader.next_record()?;
        let phase = if next_record.is_some() {
            Phase::Issuing
        } else {
            Phase::Done
        };
        Ok(Self {
            id,
            path: path.to_string(),
            reader: Some(reader),
            next_record,
            phase,
            page_table: HashMap::new(),
            free_pages: VecDeque::new(),
            trash_block_pages: None,
            pending: 0,
            max_pending: opts.max_pending,
            max_trace_cycles: opts.max_trace_cycles,
            stats: ThreadStats::default(),
        })
    }

    /// Thread id.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Trace file path, for the final report.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True when nothing more will ever come from this thread.
    pub fn is_done(&self) -> bool {
        match self.phase {
            Phase::Done => true,
            Phase::Draining => self.pending == 0,
            Phase::Issuing => false,
        }
    }

    /// True for the configured trash thread.
    pub fn is_trash(&self) -> bool {
        self.trash_block_pages.is_some()
    }

    /// Outstanding transaction count.
    pub fn pending(&self) -> u64 {
        self.pending
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> &ThreadStats {
        &self.stats
    }

    /// Number of distinct virtual pages mapped so far.
    pub fn working_set_pages(&self) -> usize {
        self.page_table.len()
    }

    /// State bits of a virtual page, if mapped.
    pub fn page_flags(&self, vpage: u64) -> Option<PageFlags> {
        self.page_table.get(&vpage).map(|e| e.flags)
    }

    /// Backing physical page of a virtual page, if mapped.
    pub fn page_phys(&self, vpage: u64) -> Option<PhysAddr> {
        self.page_table.get(&vpage).map(|e| e.phys)
    }

    /// Resets the per-quantum statistics counters.
    pub fn reset_quantum_stats(&mut self) {
        self.stats.reset_quantum();
    }

    /// One scheduled cycle. Called only while this thread is in the current
    /// quantum's running set.
    ///
    /// # Errors
    ///
    /// Propagates trace parse errors and shared-state protocol violations.
    pub fn advance(&mut self, ctx: &mut SchedContext<'_>) -> Result<(), SimError> {
        match self.phase {
            Phase::Done => {
                self.stats.done_cycles += 1;
                return Ok(());
            }
            Phase::Draining => {
                if self.pending == 0 {
                    self.phase = Phase::Done;
                    self.stats.done_cycles += 1;
                } else {
                    self.stats.drain_cycles += 1;
                }
                return Ok(());
            }
            Phase::Issuing => {}
        }

        if self.pending >= self.max_pending {
            self.stats.throttle_cycles += 1;
            ctx.totals.throttle_cycles += 1;
            return Ok(());
        }

        self.stats.trace_cycles += 1;
        if self.max_trace_cycles > 0 && self.stats.trace_cycles >= self.max_trace_cycles {
            self.enter_drain();
            return Ok(());
        }

        let due = self
            .next_record
            .is_some_and(|r| self.stats.trace_cycles >= r.due_cycle);
        if due {
            if let Some(record) = self.next_record.take() {
                self.issue(ctx, record)?;
            }
            self.refill_record()?;
        }
        Ok(())
    }

    /// Invoked by the scheduler when one of this thread's transactions
    /// retires.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] when nothing is pending — a completion
    /// the scheduler routed here that this thread never issued.
    pub fn transaction_complete(&mut self) -> Result<(), SimError> {
        if self.pending == 0 {
            return Err(SimError::Protocol(format!(
                "thread {} received a completion with no pending transactions",
                self.id
            )));
        }
        self.pending -= 1;
        self.stats.completed += 1;
        if self.phase == Phase::Draining && self.pending == 0 {
            self.phase = Phase::Done;
        }
        Ok(())
    }

    /// Invoked by the scheduler when the engine evicts one of this thread's
    /// mapped pages. Resets the page's state so the next access re-fetches.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] if `vpage` is not mapped; the scheduler
    /// only routes evictions of validly mapped pages.
    pub fn page_evicted(&mut self, vpage: u64) -> Result<(), SimError> {
        let entry = self.page_table.get_mut(&vpage).ok_or_else(|| {
            SimError::Protocol(format!(
                "eviction for unmapped virtual page {vpage:#x} on thread {}",
                self.id
            ))
        })?;
        self.stats.evictions += 1;
        self.stats.evictions_quantum += 1;
        let flags = entry.flags;
        if flags.prefetched && !flags.accessed {
            self.stats.unused_prefetches += 1;
            self.stats.unused_prefetches_quantum += 1;
        }
        if flags.dirty {
            self.stats.dirty_evictions += 1;
        } else {
            self.stats.clean_evictions += 1;
        }
        entry.flags = PageFlags::default();
        Ok(())
    }

    /// Marks a prefetch attempt on a virtual page and updates the prefetch
    /// counters. The `prefetched` bit is only set when the page has not been
    /// accessed; `prefetch_attempted` is always set.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] if `vpage` is not mapped.
    pub fn mark_prefetched(&mut self, vpage: u64) -> Result<(), SimError> {
        let entry = self.page_table.get_mut(&vpage).ok_or_else(|| {
            SimError::Protocol(format!(
                "prefetch for unmapped virtual page {vpage:#x} on thread {}",
                self.id
            ))
        })?;
        entry.flags.prefetch_attempted = true;
        if entry.flags.accessed {
            self.stats.prefetches_already_cached += 1;
        } else {
            entry.flags.prefetched = true;
            self.stats.prefetches_issued += 1;
        }
        Ok(())
    }

    /// Counts a trash-block prefetch on this thread's statistics.
    pub fn note_trash_prefetch(&mut self) {
        self.stats.prefetches_issued += 1;
    }

    /// Maps every page of `vpages` up front (the preallocation dry run).
    /// No classification happens and nothing is issued.
    ///
    /// # Errors
    ///
    /// Propagates allocation and mapping errors.
    pub fn preallocate(
        &mut self,
        ctx: &mut SchedContext<'_>,
        vpages: &[u64],
    ) -> Result<usize, SimError> {
        for &vpage in vpages {
            let _ = self.translate(ctx, VirtAddr::new(vpage))?;
        }
        Ok(self.page_table.len())
    }

    /// Reserves and maps the trash thread's block of `block_pages` pages.
    /// All of this thread's future addresses fold into the block, so its
    /// traffic keeps cycling the same reserved region.
    ///
    /// # Errors
    ///
    /// Propagates allocation and mapping errors.
    pub fn preallocate_trash(
        &mut self,
        ctx: &mut SchedContext<'_>,
        block_pages: u64,
    ) -> Result<usize, SimError> {
        self.trash_block_pages = Some(block_pages);
        let block = ctx.new_alloc_exact(self.id, block_pages)?;
        self.free_pages.extend(block);
        let page_size = ctx.geometry.page_size;
        for i in 0..block_pages {
            let _ = self.translate(ctx, VirtAddr::new(i * page_size))?;
        }
        Ok(self.page_table.len())
    }

    /// Translates a virtual address, establishing the mapping on first touch.
    ///
    /// A fresh mapping consumes a page from the local free reserve (refilled
    /// in allocator batches), registers ownership with the scheduler, and
    /// reconciles against the unmapped-eviction set: a page the engine
    /// evicted before it was mapped is *not* assumed resident even when the
    /// prefilled cache range would otherwise cover it.
    ///
    /// # Errors
    ///
    /// Propagates allocation exhaustion and ownership-table violations.
    pub fn translate(
        &mut self,
        ctx: &mut SchedContext<'_>,
        vaddr: VirtAddr,
    ) -> Result<PhysAddr, SimError> {
        let geometry = *ctx.geometry;
        let folded = self.fold_addr(vaddr.val(), &geometry);
        let vpage = (folded / geometry.page_size) * geometry.page_size;
        let offset = folded % geometry.page_size;

        if !self.page_table.contains_key(&vpage) {
            if self.free_pages.is_empty() {
                let batch = ctx.new_alloc(self.id)?;
                self.free_pages.extend(batch);
            }
            let phys_page = self.free_pages.pop_front().ok_or_else(|| {
                SimError::Protocol("allocator returned an empty batch".to_string())
            })?;
            let evicted_before_mapped = ctx.register_mapping(phys_page, self.id, vpage)?;
            let mut flags = PageFlags::default();
            if !evicted_before_mapped
                && geometry.prefill_cache
                && phys_page.val() < geometry.cache_bytes()
            {
                // The engine prefilled its cache from the bottom of the
                // physical range, so this page is already resident.
                flags.accessed = true;
            }
            let _ = self.page_table.insert(vpage, PageEntry { phys: phys_page, flags });
        }

        let entry = self.page_table.get(&vpage).ok_or_else(|| {
            SimError::Protocol(format!("virtual page {vpage:#x} vanished after mapping"))
        })?;
        Ok(PhysAddr::new(entry.phys.val() + offset))
    }

    fn issue(&mut self, ctx: &mut SchedContext<'_>, record: TraceRecord) -> Result<(), SimError> {
        let phys = self.translate(ctx, VirtAddr::new(record.addr))?;
        let geometry = *ctx.geometry;
        let folded = self.fold_addr(record.addr, &geometry);
        let vpage = (folded / geometry.page_size) * geometry.page_size;

        if self.is_trash() {
            // Trash traffic exists to cycle the cache; it only keeps the
            // dirty bit honest and is excluded from classification.
            if let Some(entry) = self.page_table.get_mut(&vpage) {
                entry.flags.accessed = true;
                if record.is_write {
                    entry.flags.dirty = true;
                }
            }
        } else {
            let first = !ctx
                .prefetcher
                .was_touched_this_quantum(self.id, phys.val());
            self.classify_access(vpage, record.is_write, first)?;
        }

        ctx.add_transaction(self.id, record.is_write, phys)?;
        self.pending += 1;
        self.stats.issued += 1;
        self.stats.pending_peak = self.stats.pending_peak.max(self.pending);
        Ok(())
    }

    /// Reads the page's state, buckets the access, then applies the state
    /// update.
    fn classify_access(
        &mut self,
        vpage: u64,
        is_write: bool,
        first_this_quantum: bool,
    ) -> Result<(), SimError> {
        let entry = self.page_table.get_mut(&vpage).ok_or_else(|| {
            SimError::Protocol(format!("access to unmapped virtual page {vpage:#x}"))
        })?;
        let flags = entry.flags;
        let class = AccessClass::of(flags.prefetched, flags.accessed, flags.prefetch_attempted);
        if class == AccessClass::PrefetchHit {
            // This prefetch got used after all; take back one provisional
            // unused count if an earlier eviction charged it.
            self.stats.unused_prefetches = self.stats.unused_prefetches.saturating_sub(1);
        }
        self.stats.record_access(class, first_this_quantum);
        entry.flags.accessed = true;
        if is_write {
            entry.flags.dirty = true;
        }
        Ok(())
    }

    fn refill_record(&mut self) -> Result<(), SimError> {
        if let Some(reader) = self.reader.as_mut() {
            self.next_record = reader.next_record()?;
        }
        if self.next_record.is_none() {
            self.reader = None;
            self.enter_drain();
        }
        Ok(())
    }

    fn enter_drain(&mut self) {
        self.next_record = None;
        self.reader = None;
        self.phase = if self.pending == 0 {
            Phase::Done
        } else {
            Phase::Draining
        };
    }

    fn fold_addr(&self, addr: u64, geometry: &MemoryGeometry) -> u64 {
        let addr = addr % geometry.total_bytes();
        match self.trash_block_pages {
            Some(pages) if pages > 0 => addr % (pages * geometry.page_size),
            _ => addr,
        }
    }
}
