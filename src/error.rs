//! Error types reported by pool construction and submission.

use thiserror::Error;

/// Rejected pool configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// `max_threads` was zero; the pool needs at least one worker slot.
    #[error("max_threads must be at least 1")]
    InvalidMaxThreads,
}

/// Why a submission did not take.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The pool is shutting down. The item was released before returning.
    #[error("pool is shutting down")]
    ShuttingDown,
    /// The provider refused to grant a worker. The item stays queued and
    /// is still released eventually, by an existing worker or by
    /// [`close`](crate::WorkPool::close).
    #[error("provider refused to grant a worker")]
    ProviderRejected,
}
