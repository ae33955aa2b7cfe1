//! Run-log emission.
//!
//! The run log is line-oriented `<field> <value>` pairs under delimited
//! headers. Downstream analysis tooling greps these exact phrases
//! ("has a memory map of size", "Starting quantum", "Data for threads that
//! just ran", "done_threads", "Completed transactions"); keep them stable.

use std::io::{self, Write};

use crate::common::ThreadId;
use crate::thread::TraceThread;

/// Writes the structured run log to any sink.
pub struct Reporter {
    out: Box<dyn Write>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

impl Reporter {
    /// Wraps a log sink.
    pub fn new(out: Box<dyn Write>) -> Self {
        Self { out }
    }

    /// Startup line reporting a thread's preallocated working-set size.
    pub fn memory_map(&mut self, thread: ThreadId, pages: usize) -> io::Result<()> {
        writeln!(self.out, "Thread {thread} has a memory map of size {pages}")
    }

    /// Per-quantum banner.
    pub fn quantum_banner(&mut self, quantum: u64, cycle: u64) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "Starting quantum {quantum} at cycle {cycle}")
    }

    /// Statistics block for the threads that ran in the quantum that just
    /// ended, terminated by the count of finished threads.
    pub fn quantum_stats(
        &mut self,
        ran: &[ThreadId],
        threads: &[TraceThread],
    ) -> io::Result<()> {
        writeln!(self.out, "Data for threads that just ran:")?;
        for &t in ran {
            writeln!(self.out, "thread_id {t}")?;
            threads[t].stats().write_quantum_fields(&mut self.out)?;
            writeln!(self.out)?;
        }
        let done = threads.iter().filter(|t| t.is_done()).count();
        writeln!(self.out, "done_threads {done}")?;
        writeln!(self.out)
    }

    /// Final per-thread summary blocks.
    pub fn final_summary(&mut self, threads: &[TraceThread]) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "Completed transactions:")?;
        for thread in threads {
            writeln!(self.out, "thread {}", thread.id())?;
            writeln!(self.out, "tracefile {}", thread.path())?;
            thread.stats().write_total_fields(&mut self.out)?;
            writeln!(self.out)?;
        }
        Ok(())
    }

    /// Flushes the sink.
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
