//! Deterministic fixed-latency reference engine.
//!
//! This is a stand-in for a real memory-timing engine: every transaction
//! takes a fixed latency (plus a penalty when its page is not resident),
//! transactions retire strictly in submission order, and residency is
//! tracked by a FIFO page cache that raises an eviction notify whenever a
//! fill displaces a page. It makes no timing-accuracy claims; it exists so
//! the binary runs end-to-end and the test suite has a deterministic
//! collaborator honoring the [`MemoryEngine`](super::MemoryEngine) contract,
//! including in-order same-key completion.

use std::collections::{HashSet, VecDeque};

use serde::Deserialize;

use super::{EngineEvent, MMIO_PREFETCH, MMIO_TRASH_PREFETCH, MemoryEngine, NOTIFY_EVICT, QUERY_CACHE, QUERY_GEOMETRY};
use crate::common::PhysAddr;

/// Default configuration constants for the reference engine.
mod defaults {
    /// Size of one page in bytes.
    pub const PAGE_SIZE: u64 = 1024;

    /// Total physical pages (4 GiB of 1 KiB pages).
    pub const TOTAL_PAGES: u64 = 4_194_304;

    /// Pages held by the engine cache (1 GiB of 1 KiB pages).
    pub const CACHE_PAGES: u64 = 1_048_576;

    /// Cycles for a transaction whose page is resident.
    pub const HIT_LATENCY: u64 = 24;

    /// Extra cycles when the page has to be filled first.
    pub const MISS_PENALTY: u64 = 180;
}

/// Configuration for [`SimpleEngine`], deserializable from the run document.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SimpleEngineConfig {
    /// Size of one page in bytes.
    #[serde(default = "SimpleEngineConfig::default_page_size")]
    pub page_size: u64,

    /// Total number of physical pages.
    #[serde(default = "SimpleEngineConfig::default_total_pages")]
    pub total_pages: u64,

    /// Number of pages the cache holds.
    #[serde(default = "SimpleEngineConfig::default_cache_pages")]
    pub cache_pages: u64,

    /// Prefill the cache with the bottom `cache_pages` physical pages.
    #[serde(default)]
    pub prefill_cache: bool,

    /// Cycles for a transaction whose page is resident.
    #[serde(default = "SimpleEngineConfig::default_hit_latency")]
    pub hit_latency: u64,

    /// Extra cycles when the page has to be filled first.
    #[serde(default = "SimpleEngineConfig::default_miss_penalty")]
    pub miss_penalty: u64,
}

impl SimpleEngineConfig {
    fn default_page_size() -> u64 {
        defaults::PAGE_SIZE
    }

    fn default_total_pages() -> u64 {
        defaults::TOTAL_PAGES
    }

    fn default_cache_pages() -> u64 {
        defaults::CACHE_PAGES
    }

    fn default_hit_latency() -> u64 {
        defaults::HIT_LATENCY
    }

    fn default_miss_penalty() -> u64 {
        defaults::MISS_PENALTY
    }
}

impl Default for SimpleEngineConfig {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            total_pages: defaults::TOTAL_PAGES,
            cache_pages: defaults::CACHE_PAGES,
            prefill_cache: false,
            hit_latency: defaults::HIT_LATENCY,
            miss_penalty: defaults::MISS_PENALTY,
        }
    }
}

struct PendingTxn {
    ready: u64,
    is_write: bool,
    addr: u64,
}

/// Fixed-latency, FIFO-retirement reference engine with a FIFO page cache.
pub struct SimpleEngine {
    cfg: SimpleEngineConfig,
    cycle: u64,
    /// In-flight transactions, in submission order. `ready` is monotonic so
    /// retirement order equals submission order.
    queue: VecDeque<PendingTxn>,
    last_ready: u64,
    resident: HashSet<u64>,
    fill_order: VecDeque<u64>,
    /// Evictions staged by `mmio` prefills, emitted on the next `advance`.
    staged: Vec<EngineEvent>,
}

impl std::fmt::Debug for SimpleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleEngine")
            .field("cycle", &self.cycle)
            .field("in_flight", &self.queue.len())
            .field("resident", &self.resident.len())
            .finish()
    }
}

impl SimpleEngine {
    /// Creates a reference engine; prefills the cache if configured.
    pub fn new(cfg: SimpleEngineConfig) -> Self {
        let mut engine = Self {
            cfg,
            cycle: 0,
            queue: VecDeque::new(),
            last_ready: 0,
            resident: HashSet::new(),
            fill_order: VecDeque::new(),
            staged: Vec::new(),
        };
        if cfg.prefill_cache {
            for page in 0..cfg.cache_pages.min(cfg.total_pages) {
                let _ = engine.resident.insert(page);
                engine.fill_order.push_back(page);
            }
        }
        engine
    }

    /// Brings `page` into the cache, pushing any displaced page's eviction
    /// notify into `events`.
    fn fill_page(&mut self, page: u64, events: &mut Vec<EngineEvent>) {
        if self.resident.contains(&page) {
            return;
        }
        if self.resident.len() as u64 >= self.cfg.cache_pages {
            if let Some(victim) = self.fill_order.pop_front() {
                let _ = self.resident.remove(&victim);
                events.push(EngineEvent::Notify {
                    op: NOTIFY_EVICT,
                    addr: victim * self.cfg.page_size,
                    cycle: self.cycle,
                });
            }
        }
        let _ = self.resident.insert(page);
        self.fill_order.push_back(page);
    }
}

impl MemoryEngine for SimpleEngine {
    fn submit(&mut self, is_write: bool, addr: PhysAddr) -> bool {
        let page = addr.page_number(self.cfg.page_size);
        let latency = if self.resident.contains(&page) {
            self.cfg.hit_latency
        } else {
            self.cfg.hit_latency + self.cfg.miss_penalty
        };
        // Monotonic ready times guarantee FIFO retirement.
        let ready = (self.cycle + latency).max(self.last_ready);
        self.last_ready = ready;
        self.queue.push_back(PendingTxn {
            ready,
            is_write,
            addr: addr.val(),
        });
        true
    }

    fn advance(&mut self) -> Vec<EngineEvent> {
        self.cycle += 1;
        let mut events = std::mem::take(&mut self.staged);
        while let Some(front) = self.queue.front() {
            if front.ready > self.cycle {
                break;
            }
            let txn = match self.queue.pop_front() {
                Some(t) => t,
                None => break,
            };
            let page = txn.addr / self.cfg.page_size;
            self.fill_page(page, &mut events);
            events.push(EngineEvent::Complete {
                is_write: txn.is_write,
                addr: txn.addr,
                cycle: self.cycle,
            });
        }
        events
    }

    fn query(&mut self, op: u64, _in1: u64, _in2: u64) -> (u64, u64) {
        match op {
            QUERY_GEOMETRY => (self.cfg.total_pages, self.cfg.page_size),
            QUERY_CACHE => (self.cfg.cache_pages, u64::from(self.cfg.prefill_cache)),
            _ => (0, 0),
        }
    }

    fn mmio(&mut self, op: u64, addr: u64) {
        if op == MMIO_PREFETCH || op == MMIO_TRASH_PREFETCH {
            let page = addr / self.cfg.page_size;
            let mut events = std::mem::take(&mut self.staged);
            self.fill_page(page, &mut events);
            self.staged = events;
        }
    }
}
