/// Error Types Module
///
/// Defines the error taxonomy for the export job. Transient provider errors
/// are absorbed by the executor's retry loop and never surface; everything in
/// `JobError` is fatal for the whole job.
use thiserror::Error;

/// Error returned by a batch provider fetch.
///
/// The transient/fatal split drives the executor's retry policy: transient
/// errors (timeouts, rate limits, blocks not yet available) are retried with
/// backoff, fatal errors abort the batch immediately.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("fatal provider error: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Fatal job error surfaced to the caller.
///
/// A job either completes the full requested range or fails with exactly one
/// of these; there is no partial-success reporting.
#[derive(Debug, Error)]
pub enum JobError {
    /// Invalid range bounds or selection flags. Detected before any network
    /// access; the job never starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Retries exhausted for one batch. The block range identifies where a
    /// resumed run should pick up.
    #[error("failed to fetch blocks {from_slot}-{to_slot} after {attempts} attempts: {source}")]
    BatchFetch {
        from_slot: u64,
        to_slot: u64,
        attempts: u32,
        source: FetchError,
    },

    /// A fetched payload is missing structure the export selection requires.
    #[error("malformed block at slot {slot}: {reason}")]
    MalformedBlock { slot: u64, reason: String },

    /// The exporter failed to persist a record or to close cleanly.
    #[error("export write failed: {0}")]
    ExportWrite(#[source] std::io::Error),
}
