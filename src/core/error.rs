//! Error types for scheduler operations.

use thiserror::Error;

use super::job::JobId;

/// Errors produced by scheduler components.
///
/// Per-job failures (spawn, I/O, wait) never surface here; they end up as a
/// `Failed` job record instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Waiting queue is at its configured depth.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// Job asks for more capacity units than the scheduler will ever have.
    #[error("capacity exceeded: requested {requested} units, total {total}")]
    CapacityExceeded {
        /// Units requested by the job.
        requested: u32,
        /// Total units managed by the scheduler.
        total: u32,
    },
    /// Submission is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// No job with this ID is registered.
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    /// A blocking wait ran out of time.
    #[error("operation timed out")]
    Timeout,
    /// The scheduler has been shut down.
    #[error("scheduler has been shut down")]
    Shutdown,
    /// The durable ID counter could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// The external process could not be set up or started.
    #[error("launch error: {0}")]
    Launch(String),
    /// Internal failure with context (worker spawn, channel closed, ...).
    #[error("backend error: {0}")]
    Backend(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
