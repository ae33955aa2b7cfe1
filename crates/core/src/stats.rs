//! Per-thread statistics collection.
//!
//! This module tracks everything a thread reports at quantum boundaries and
//! in the final summary. It provides:
//! 1. **Issue accounting:** issued, completed, throttle/drain/done cycles.
//! 2. **Access classification:** the four mutually exclusive hit/miss
//!    buckets, each with a first-access-this-quantum twin.
//! 3. **Prefetch accounting:** issued vs already-cached prefetches and
//!    unused-prefetch tracking.
//! 4. **Eviction accounting:** total, per-quantum, dirty, and clean counts.

use std::io::{self, Write};

/// The classification bucket an access fell into.
///
/// Buckets are mutually exclusive and exhaustive: every classified access
/// increments exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessClass {
    /// The page was prefetched and not yet touched: the prefetch paid off.
    PrefetchHit,
    /// The page was touched before and a prefetch had been attempted on it.
    PrefetchCachedHit,
    /// The page was touched before without any prefetch involvement.
    NonPrefetchHit,
    /// Cold access: nothing touched and no prefetch attempted.
    Miss,
}

impl AccessClass {
    /// Buckets an access from the page-state bits *before* the access
    /// updates them. Priority follows the page lifecycle: an untouched
    /// prefetched page is a prefetch hit; a touched page splits on whether
    /// a prefetch was ever attempted; everything else is a cold miss.
    pub fn of(prefetched: bool, accessed: bool, prefetch_attempted: bool) -> Self {
        if prefetched && !accessed {
            Self::PrefetchHit
        } else if accessed && prefetch_attempted {
            Self::PrefetchCachedHit
        } else if accessed {
            Self::NonPrefetchHit
        } else {
            Self::Miss
        }
    }
}

/// Statistics record for one thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadStats {
    /// Transactions issued to the engine.
    pub issued: u64,
    /// Transactions completed by the engine.
    pub completed: u64,
    /// Highest outstanding-transaction count observed.
    pub pending_peak: u64,

    /// Cycles spent making progress while scheduled.
    pub trace_cycles: u64,
    /// Cycles spent refusing to issue at the outstanding ceiling.
    pub throttle_cycles: u64,
    /// Cycles spent with the trace exhausted but transactions pending.
    pub drain_cycles: u64,
    /// Cycles spent fully finished but still scheduled.
    pub done_cycles: u64,

    /// Accesses hitting a prefetched, untouched page.
    pub prefetch_hits: u64,
    /// Accesses hitting a previously touched page with a prefetch attempted.
    pub prefetch_cached_hits: u64,
    /// Accesses hitting a previously touched page with no prefetch attempted.
    pub nonprefetch_hits: u64,
    /// Cold accesses.
    pub misses: u64,

    /// First-touch-this-quantum twin of `prefetch_hits`.
    pub first_prefetch_hits: u64,
    /// First-touch-this-quantum twin of `prefetch_cached_hits`.
    pub first_prefetch_cached_hits: u64,
    /// First-touch-this-quantum twin of `nonprefetch_hits`.
    pub first_nonprefetch_hits: u64,
    /// First-touch-this-quantum twin of `misses`.
    pub first_misses: u64,

    /// Prefetches issued for pages not yet accessed.
    pub prefetches_issued: u64,
    /// Prefetches that targeted a page already accessed (assumed resident).
    pub prefetches_already_cached: u64,
    /// Running count of prefetched pages evicted before any use. Decremented
    /// when a later prefetch of the same page does get used, so a page whose
    /// prefetch eventually pays off is not counted as wasted forever.
    pub unused_prefetches: u64,
    /// Prefetched-but-unused evictions observed during the current quantum.
    pub unused_prefetches_quantum: u64,

    /// Pages of this thread evicted from the engine cache.
    pub evictions: u64,
    /// Evictions observed during the current quantum.
    pub evictions_quantum: u64,
    /// Evictions of dirty pages.
    pub dirty_evictions: u64,
    /// Evictions of clean pages.
    pub clean_evictions: u64,
}

impl ThreadStats {
    /// Records one classified access.
    pub fn record_access(&mut self, class: AccessClass, first_this_quantum: bool) {
        match class {
            AccessClass::PrefetchHit => {
                self.prefetch_hits += 1;
                if first_this_quantum {
                    self.first_prefetch_hits += 1;
                }
            }
            AccessClass::PrefetchCachedHit => {
                self.prefetch_cached_hits += 1;
                if first_this_quantum {
                    self.first_prefetch_cached_hits += 1;
                }
            }
            AccessClass::NonPrefetchHit => {
                self.nonprefetch_hits += 1;
                if first_this_quantum {
                    self.first_nonprefetch_hits += 1;
                }
            }
            AccessClass::Miss => {
                self.misses += 1;
                if first_this_quantum {
                    self.first_misses += 1;
                }
            }
        }
    }

    /// Resets the per-quantum counters at a quantum boundary.
    pub fn reset_quantum(&mut self) {
        self.evictions_quantum = 0;
        self.unused_prefetches_quantum = 0;
    }

    /// Writes the per-quantum field block, one `<field> <value>` pair per
    /// line. The field names are consumed by offline analysis tooling; keep
    /// them stable.
    pub fn write_quantum_fields(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "issued {}", self.issued)?;
        writeln!(out, "completed {}", self.completed)?;
        writeln!(out, "pending {}", self.issued - self.completed)?;
        writeln!(out, "trace_cycles {}", self.trace_cycles)?;
        writeln!(out, "throttle_cycles {}", self.throttle_cycles)?;
        writeln!(out, "prefetch_hits {}", self.prefetch_hits)?;
        writeln!(out, "prefetch_cached_hits {}", self.prefetch_cached_hits)?;
        writeln!(out, "nonprefetch_hits {}", self.nonprefetch_hits)?;
        writeln!(out, "misses {}", self.misses)?;
        writeln!(out, "first_prefetch_hits {}", self.first_prefetch_hits)?;
        writeln!(
            out,
            "first_prefetch_cached_hits {}",
            self.first_prefetch_cached_hits
        )?;
        writeln!(out, "first_nonprefetch_hits {}", self.first_nonprefetch_hits)?;
        writeln!(out, "first_misses {}", self.first_misses)?;
        writeln!(out, "prefetches_issued {}", self.prefetches_issued)?;
        writeln!(
            out,
            "prefetches_already_cached {}",
            self.prefetches_already_cached
        )?;
        writeln!(out, "unused_prefetches {}", self.unused_prefetches)?;
        writeln!(
            out,
            "unused_prefetches_quantum {}",
            self.unused_prefetches_quantum
        )?;
        writeln!(out, "evictions_quantum {}", self.evictions_quantum)?;
        Ok(())
    }

    /// Writes the final-summary field block.
    pub fn write_total_fields(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "complete {}", self.completed)?;
        writeln!(out, "issued {}", self.issued)?;
        writeln!(out, "pending_peak {}", self.pending_peak)?;
        writeln!(out, "trace_cycles {}", self.trace_cycles)?;
        writeln!(out, "throttle_cycles {}", self.throttle_cycles)?;
        writeln!(out, "drain_cycles {}", self.drain_cycles)?;
        writeln!(out, "done_cycles {}", self.done_cycles)?;
        writeln!(out, "prefetch_hits {}", self.prefetch_hits)?;
        writeln!(out, "prefetch_cached_hits {}", self.prefetch_cached_hits)?;
        writeln!(out, "nonprefetch_hits {}", self.nonprefetch_hits)?;
        writeln!(out, "misses {}", self.misses)?;
        writeln!(out, "prefetches_issued {}", self.prefetches_issued)?;
        writeln!(
            out,
            "prefetches_already_cached {}",
            self.prefetches_already_cached
        )?;
        writeln!(out, "unused_prefetches {}", self.unused_prefetches)?;
        writeln!(out, "evictions {}", self.evictions)?;
        writeln!(out, "dirty_evictions {}", self.dirty_evictions)?;
        writeln!(out, "clean_evictions {}", self.clean_evictions)?;
        Ok(())
    }
}
