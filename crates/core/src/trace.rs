//! Trace streams and the per-file preallocation cache.
//!
//! A trace is an ordered log of `<due_cycle> <direction> <virtual_address>`
//! records, one per line. A `#` starts a comment stripped to end of line;
//! lines that are blank after stripping are skipped. Anything else that is
//! not exactly three integers is a fatal parse error — traces are generated
//! artifacts, so a malformed line means the generator is broken, not that
//! the record should be skipped.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use crate::common::SimError;
use crate::engine::MemoryGeometry;

/// One parsed trace record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    /// Thread-local cycle at which this access becomes due.
    pub due_cycle: u64,
    /// Direction: write iff the trace's direction code was odd.
    pub is_write: bool,
    /// Raw virtual address, not yet reduced modulo the address space.
    pub addr: u64,
}

/// Buffered reader yielding [`TraceRecord`]s from one trace stream.
pub struct TraceReader {
    path: String,
    lines: Box<dyn BufRead + Send>,
    line_no: u64,
}

impl std::fmt::Debug for TraceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceReader")
            .field("path", &self.path)
            .field("line_no", &self.line_no)
            .finish()
    }
}

impl TraceReader {
    /// Opens a trace file for reading.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Io`] when the file cannot be opened.
    pub fn open(path: &str) -> Result<Self, SimError> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_string(),
            lines: Box::new(BufReader::new(file)),
            line_no: 0,
        })
    }

    /// Wraps an in-memory source; `path` is only used in diagnostics.
    pub fn from_source(path: &str, source: impl BufRead + Send + 'static) -> Self {
        Self {
            path: path.to_string(),
            lines: Box::new(source),
            line_no: 0,
        }
    }

    /// Reads the next record, skipping comments and blank lines.
    ///
    /// Returns `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::TraceFormat`] for a line that is not exactly
    /// three integers, [`SimError::Io`] for read failures.
    pub fn next_record(&mut self) -> Result<Option<TraceRecord>, SimError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.lines.read_line(&mut line)?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let payload = match line.split_once('#') {
                Some((before, _comment)) => before,
                None => line.as_str(),
            };
            let fields: Vec<&str> = payload.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != 3 {
                return Err(self.format_error(format!(
                    "expected exactly three fields, found {}",
                    fields.len()
                )));
            }
            let mut values = [0u64; 3];
            for (slot, field) in values.iter_mut().zip(&fields) {
                *slot = field.parse::<u64>().map_err(|_| {
                    self.format_error(format!("field {field:?} is not an unsigned integer"))
                })?;
            }
            return Ok(Some(TraceRecord {
                due_cycle: values[0],
                is_write: values[1] % 2 == 1,
                addr: values[2],
            }));
        }
    }

    fn format_error(&self, reason: String) -> SimError {
        SimError::TraceFormat {
            path: self.path.clone(),
            line: self.line_no,
            reason,
        }
    }
}

/// Per-trace-file working-set cache.
///
/// The first thread replaying a given file performs the full preallocation
/// scan and stores the resulting page list; later threads replaying the same
/// file reuse it without touching the file again. Single writer, then many
/// readers — the `Arc` is handed out only after the scan completed.
#[derive(Debug, Default)]
pub struct TraceMapCache {
    maps: HashMap<String, Arc<Vec<u64>>>,
}

impl TraceMapCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the distinct virtual pages touched by `path`, in first-touch
    /// order, with every address reduced modulo the physical address space
    /// the way translation will reduce it.
    ///
    /// # Errors
    ///
    /// Propagates open, read, and parse errors from the scan.
    pub fn pages_for(
        &mut self,
        path: &str,
        geometry: &MemoryGeometry,
    ) -> Result<Arc<Vec<u64>>, SimError> {
        if let Some(pages) = self.maps.get(path) {
            return Ok(Arc::clone(pages));
        }
        let mut reader = TraceReader::open(path)?;
        let mut seen = HashSet::new();
        let mut pages = Vec::new();
        while let Some(record) = reader.next_record()? {
            let addr = record.addr % geometry.total_bytes();
            let vpage = (addr / geometry.page_size) * geometry.page_size;
            if seen.insert(vpage) {
                pages.push(vpage);
            }
        }
        let pages = Arc::new(pages);
        let _ = self.maps.insert(path.to_string(), Arc::clone(&pages));
        Ok(pages)
    }

    /// True when `path` has already been scanned.
    pub fn contains(&self, path: &str) -> bool {
        self.maps.contains_key(path)
    }
}
