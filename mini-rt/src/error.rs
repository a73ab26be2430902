//! Error types surfaced at the boundary of each core component.
//!
//! Every fallible operation returns one of these instead of a string or a
//! bare `bool`, so callers can match on the exact failure instead of
//! re-deriving it from a log line.

use thiserror::Error;

/// Failure of a [`crate::timer::Timer::register`] call.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum TimerError {
    /// The allocator could not provide storage for a new entry.
    #[error("out of memory registering timer entry")]
    OutOfMemory,
}

/// Failure of a [`crate::queue::LockFreeQueue`] consumer acquisition.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum QueueError {
    /// The queue holds no nodes right now.
    #[error("queue is empty")]
    Empty,
    /// Another consumer currently holds the `IS_CONSUMING` latch.
    #[error("another consumer is active")]
    Contended,
}

/// Failure of a [`crate::ring::RingBuffer::push`] call.
///
/// Generic over the ring's element type, so it carries the spilled
/// [`List`](crate::list::List) itself rather than just a count; `thiserror`'s
/// derive would force a `T: Debug` bound onto every caller, so `Debug`,
/// `Display`, and `Error` are implemented by hand instead.
pub enum RingError<T> {
    /// The ring reached capacity mid-push; the overflowed nodes (plus
    /// whatever remained to be pushed) are handed back for the caller to
    /// forward to the shared [`crate::queue::LockFreeQueue`].
    Overflow {
        /// Number of nodes in the spilled-back list, for logging.
        spilled_len: usize,
        /// The spilled nodes, in push order.
        spilled: crate::list::List<T>,
    },
}

impl<T> std::fmt::Debug for RingError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingError::Overflow { spilled_len, .. } => {
                f.debug_struct("Overflow").field("spilled_len", spilled_len).finish()
            }
        }
    }
}

impl<T> std::fmt::Display for RingError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingError::Overflow { spilled_len, .. } => {
                write!(f, "ring buffer overflowed, {spilled_len} node(s) spilled")
            }
        }
    }
}

impl<T> std::error::Error for RingError<T> {}

/// Failure of [`crate::executor::Executor::run`].
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ExecutorError {
    /// `run()` was called while already running (re-entrant call, e.g.
    /// from within a task's poll).
    #[error("executor is already running")]
    AlreadyRunning,
}

/// The distinguished failure case carried by a [`crate::timer::TimeoutFuture`]'s
/// `Ready` payload when the deadline passes before the inner future completes.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("operation timed out")]
pub struct TimeoutError;
