//! Recording test engine.
//!
//! A fixed-latency engine that records every `submit` and `mmio` call and
//! completes transactions FIFO after a configurable latency. Tests keep a
//! shared handle to the state so they can inspect calls or inject scripted
//! events (evictions, stray completions) while the scheduler owns the boxed
//! engine.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use memsched_core::common::PhysAddr;
use memsched_core::engine::{EngineEvent, MemoryEngine, QUERY_CACHE, QUERY_GEOMETRY};

/// Inner state of the test engine, inspectable through the shared handle.
#[derive(Debug, Default)]
pub struct EngineCore {
    /// Reported total physical pages.
    pub total_pages: u64,
    /// Reported page size in bytes.
    pub page_size: u64,
    /// Reported cache capacity in pages.
    pub cache_pages: u64,
    /// Reported prefill flag.
    pub prefill_cache: bool,
    /// Cycles from submit to completion.
    pub latency: u64,
    /// Current engine cycle.
    pub cycle: u64,
    /// Every submit, in order: (is_write, addr).
    pub submits: Vec<(bool, u64)>,
    /// Every mmio, in order: (op, addr, engine cycle).
    pub mmios: Vec<(u64, u64, u64)>,
    /// In-flight transactions: (ready cycle, is_write, addr).
    pub pending: VecDeque<(u64, bool, u64)>,
    /// Scripted events emitted on the next advance, before completions.
    pub injected: Vec<EngineEvent>,
}

/// Cloneable handle implementing [`MemoryEngine`] over shared state.
#[derive(Clone, Debug)]
pub struct TestEngine(Rc<RefCell<EngineCore>>);

impl TestEngine {
    /// Creates a test engine reporting the given geometry.
    pub fn new(total_pages: u64, page_size: u64, cache_pages: u64, latency: u64) -> Self {
        Self(Rc::new(RefCell::new(EngineCore {
            total_pages,
            page_size,
            cache_pages,
            latency,
            ..EngineCore::default()
        })))
    }

    /// Shared handle for inspection after the engine is boxed away.
    pub fn handle(&self) -> Rc<RefCell<EngineCore>> {
        Rc::clone(&self.0)
    }

    /// Schedules a scripted event for the next advance.
    pub fn inject(&self, event: EngineEvent) {
        self.0.borrow_mut().injected.push(event);
    }
}

impl MemoryEngine for TestEngine {
    fn submit(&mut self, is_write: bool, addr: PhysAddr) -> bool {
        let mut core = self.0.borrow_mut();
        core.submits.push((is_write, addr.val()));
        let ready = core.cycle + core.latency;
        core.pending.push_back((ready, is_write, addr.val()));
        true
    }

    fn advance(&mut self) -> Vec<EngineEvent> {
        let mut core = self.0.borrow_mut();
        core.cycle += 1;
        let mut events: Vec<EngineEvent> = core.injected.drain(..).collect();
        while let Some(&(ready, is_write, addr)) = core.pending.front() {
            if ready > core.cycle {
                break;
            }
            core.pending.pop_front();
            events.push(EngineEvent::Complete {
                is_write,
                addr,
                cycle: core.cycle,
            });
        }
        events
    }

    fn query(&mut self, op: u64, _in1: u64, _in2: u64) -> (u64, u64) {
        let core = self.0.borrow();
        match op {
            QUERY_GEOMETRY => (core.total_pages, core.page_size),
            QUERY_CACHE => (core.cache_pages, u64::from(core.prefill_cache)),
            _ => (0, 0),
        }
    }

    fn mmio(&mut self, op: u64, addr: u64) {
        let mut core = self.0.borrow_mut();
        let cycle = core.cycle;
        core.mmios.push((op, addr, cycle));
    }
}
