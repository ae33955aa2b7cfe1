//! Physical page allocator.
//!
//! A process-wide bump allocator: pages are handed out in fixed-size batches
//! of monotonically increasing, page-aligned addresses and are never
//! individually freed. Exhausting physical capacity is a configuration error
//! and ends the run; there is no reclamation path.

use crate::common::{PhysAddr, SimError};
use crate::engine::MemoryGeometry;

/// Monotonic batch allocator over the physical page array.
#[derive(Debug)]
pub struct PageAllocator {
    page_size: u64,
    total_pages: u64,
    batch_pages: u64,
    next_page: u64,
}

impl PageAllocator {
    /// Creates an allocator covering the engine-reported physical range.
    pub fn new(geometry: &MemoryGeometry, batch_pages: u64) -> Self {
        Self {
            page_size: geometry.page_size,
            total_pages: geometry.total_pages,
            batch_pages,
            next_page: 0,
        }
    }

    /// Hands out the next batch of page-aligned physical addresses, in
    /// ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] when the cursor would pass total
    /// physical capacity. Exhaustion means the workload was configured
    /// against too small a physical space; it is fatal by design.
    pub fn allocate_batch(&mut self) -> Result<Vec<PhysAddr>, SimError> {
        if self.next_page + self.batch_pages > self.total_pages {
            return Err(SimError::Protocol(format!(
                "physical pages exhausted: {} of {} pages allocated, batch of {} requested",
                self.next_page, self.total_pages, self.batch_pages
            )));
        }
        let start = self.next_page;
        self.next_page += self.batch_pages;
        Ok((start..self.next_page)
            .map(|p| PhysAddr::new(p * self.page_size))
            .collect())
    }

    /// Allocates exactly `pages` pages, regardless of the batch size. Used
    /// for the trash thread's reserved block.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] on capacity exhaustion.
    pub fn allocate_exact(&mut self, pages: u64) -> Result<Vec<PhysAddr>, SimError> {
        if self.next_page + pages > self.total_pages {
            return Err(SimError::Protocol(format!(
                "physical pages exhausted: {} of {} pages allocated, block of {pages} requested",
                self.next_page, self.total_pages
            )));
        }
        let start = self.next_page;
        self.next_page += pages;
        Ok((start..self.next_page)
            .map(|p| PhysAddr::new(p * self.page_size))
            .collect())
    }

    /// Number of pages handed out so far.
    pub fn allocated_pages(&self) -> u64 {
        self.next_page
    }
}
