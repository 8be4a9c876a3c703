use thiserror::Error;

/// Recurrence evaluation and date/time errors
#[derive(Error, Debug)]
pub enum RecurError {
    /// Malformed or contradictory recurrence pattern. Surfaced at evaluation
    /// call time, never deferred into the lazy sequence.
    #[error("Invalid recurrence pattern: {0}")]
    InvalidPattern(String),

    /// Unresolvable time zone identifier. Recoverable via the caller opting
    /// into the system-default fallback.
    #[error("Unknown timezone: {0}")]
    UnknownZone(String),

    /// An unbounded pattern was evaluated without a bounded query window.
    #[error("Unbounded pattern requires a bounded query window")]
    UnboundedQuery,

    /// Calendar arithmetic produced a date that does not exist.
    #[error("Invalid date: {0}")]
    InvalidDate(String),
}

pub type RecurResult<T> = std::result::Result<T, RecurError>;
