use thiserror::Error;

/// Failures that escape a tick and surface to whoever drives the scheduler.
///
/// Errors raised by user callbacks are the caller's own `E` and travel through
/// the rejection pipeline; only the conditions below leave it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A rejection ran out of handlers. This is fatal for the owning loop.
    #[error("Unhandled rejection: {reason}")]
    UnhandledRejection { reason: String },
    /// A finally callback failed. Finally failures are never redirected.
    #[error("finally callback failed: {reason}")]
    FinallyFailed { reason: String },
    #[error("event loop exceeded {limit} ticks")]
    TickLimitExceeded { limit: usize },
    /// The deferred was dropped by every holder before it could settle.
    #[error("deferred dropped before settling")]
    Dropped,
}
