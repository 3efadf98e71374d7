//! # Errors
//!
//! One error type for every scheduler operation. Timeouts are not errors:
//! a wait that expires reports it in its result value.

use core::fmt;

/// Result type alias for scheduler operations.
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Error {
    /// No free TCB slot is available. The caller decides whether to retry
    /// or give up.
    ResourceExhausted,
    /// The handle names a task that does not exist, was deleted, or the
    /// calling core has no current task.
    InvalidHandle,
    /// Priority outside `0..MAX_PRIORITIES`.
    InvalidPriority,
    /// The caller broke the scheduler's usage contract (unmatched
    /// `resume_all`, blocking while holding the scheduler lock, ...).
    /// Scheduler state is left untouched.
    ContractViolation,
}

impl Error {
    /// Short static name, suitable for log lines.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceExhausted => "resource exhausted",
            Self::InvalidHandle => "invalid task handle",
            Self::InvalidPriority => "invalid priority",
            Self::ContractViolation => "contract violation",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
