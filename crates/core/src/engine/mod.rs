//! Memory engine interface.
//!
//! The memory-timing engine is an external collaborator: the scheduler only
//! ever talks to it through the narrow contract defined here. This module
//! provides:
//! 1. **`MemoryEngine` trait:** submit / advance / query / mmio, the complete
//!    surface the scheduler depends on.
//! 2. **`EngineEvent`:** completion and notify events raised by the engine
//!    while it advances. Draining the returned events before the next
//!    `advance` call preserves the strictly-nested callback semantics of the
//!    original interface: every event is dispatched to completion before the
//!    clock moves again.
//! 3. **`MemoryGeometry`:** the engine-reported address-space shape, resolved
//!    once at startup and treated as immutable for the rest of the run.
//! 4. **`SimpleEngine`:** a deterministic fixed-latency reference
//!    implementation used by the CLI and the test suite.

/// Deterministic fixed-latency reference engine.
pub mod simple;

pub use self::simple::{SimpleEngine, SimpleEngineConfig};

use crate::common::PhysAddr;

/// Query operation: returns `(total_pages, page_size)`.
pub const QUERY_GEOMETRY: u64 = 0;
/// Query operation: returns `(cache_pages, prefill_cache as 0/1)`.
pub const QUERY_CACHE: u64 = 1;

/// Mmio operation: prefetch hint for real workload pages.
pub const MMIO_PREFETCH: u64 = 1;
/// Mmio operation: prefetch hint for the trash thread's synthetic block.
pub const MMIO_TRASH_PREFETCH: u64 = 2;

/// Notify operation code for a page eviction. The only legal notify code;
/// anything else is a protocol violation on the engine's side.
pub const NOTIFY_EVICT: u64 = 0;

/// An asynchronous event raised by the engine during `advance`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A previously submitted transaction retired.
    Complete {
        /// Direction of the retired transaction.
        is_write: bool,
        /// Physical address the transaction was submitted with.
        addr: u64,
        /// Engine cycle at which the transaction retired.
        cycle: u64,
    },
    /// An engine-internal notification; `op` 0 is a page eviction.
    Notify {
        /// Notification operation code.
        op: u64,
        /// Page-aligned physical address the notification refers to.
        addr: u64,
        /// Engine cycle at which the notification was raised.
        cycle: u64,
    },
}

/// The complete interface between the scheduler and the memory-timing engine.
///
/// Implementations model transaction latency, an internal page cache, and
/// eviction behavior; the scheduler makes no assumption about any of that
/// beyond what this trait exposes. Same-key (`addr`, direction) transactions
/// are assumed to complete in submission order; this is an explicit, tested
/// assumption rather than something the scheduler can verify.
pub trait MemoryEngine {
    /// Enqueues one transaction. The return value indicates local acceptance,
    /// not completion.
    fn submit(&mut self, is_write: bool, addr: PhysAddr) -> bool;

    /// Advances engine-internal timing by one cycle and returns the events
    /// raised during that cycle, in order. The caller must dispatch them all
    /// before calling `advance` again.
    fn advance(&mut self) -> Vec<EngineEvent>;

    /// Startup-time introspection; see [`QUERY_GEOMETRY`] and [`QUERY_CACHE`].
    fn query(&mut self, op: u64, in1: u64, in2: u64) -> (u64, u64);

    /// Issues a side-band hint; see [`MMIO_PREFETCH`] and
    /// [`MMIO_TRASH_PREFETCH`].
    fn mmio(&mut self, op: u64, addr: u64);
}

/// Engine-reported shape of the physical address space.
///
/// Resolved once at startup via two queries and passed by reference to every
/// component that needs page math; never mutated afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryGeometry {
    /// Size of one page in bytes.
    pub page_size: u64,
    /// Total number of physical pages.
    pub total_pages: u64,
    /// Number of pages the engine's cache holds.
    pub cache_pages: u64,
    /// Whether the engine prefills its cache with the bottom of the physical
    /// range at startup.
    pub prefill_cache: bool,
}

impl MemoryGeometry {
    /// Resolves the geometry from a freshly constructed engine.
    pub fn resolve(engine: &mut dyn MemoryEngine) -> Self {
        let (total_pages, page_size) = engine.query(QUERY_GEOMETRY, 0, 0);
        let (cache_pages, prefill) = engine.query(QUERY_CACHE, 0, 0);
        Self {
            page_size,
            total_pages,
            cache_pages,
            prefill_cache: prefill != 0,
        }
    }

    /// Total size of the physical address space in bytes.
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_pages * self.page_size
    }

    /// Size of the engine cache's address range in bytes. The cache is
    /// prefilled from the bottom of the physical range, so a physical page
    /// below this bound is resident after a prefill.
    #[inline]
    pub fn cache_bytes(&self) -> u64 {
        self.cache_pages * self.page_size
    }
}
