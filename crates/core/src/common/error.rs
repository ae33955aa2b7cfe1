//! Error types for fatal simulation conditions.
//!
//! Every variant here ends the run: the scheduler has no retry policy and
//! never downgrades a contract breach to a warning. Expected transient
//! conditions (per-thread throttling, schedule repair, unmapped-eviction
//! reconciliation) are ordinary control flow and never surface as errors.

use thiserror::Error;

/// Fatal simulation error.
#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed run configuration: bad schedule entries, mismatched array
    /// lengths, invalid trash-thread parameters. Detected eagerly at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A trace line did not parse as exactly three integers.
    #[error("trace parse error in {path} line {line}: {reason}")]
    TraceFormat {
        /// Path of the offending trace file.
        path: String,
        /// 1-based line number of the offending line.
        line: u64,
        /// What went wrong on that line.
        reason: String,
    },

    /// A contract breach between the scheduler and the memory engine, or an
    /// internal bookkeeping invariant violation: completion for an unknown
    /// in-flight key, unknown notify operation, double page mapping, or
    /// physical-page exhaustion.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// I/O failure while reading a trace or writing the run log.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
