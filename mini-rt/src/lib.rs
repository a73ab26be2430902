//! A small cooperative async runtime built from first principles: a
//! polling `Future` trait, a waker ABI, a single-threaded priority
//! executor, a timer registry, and the lock-free scheduling primitives
//! (an MPMC stack and a bounded SPMC ring buffer) a future work-stealing
//! executor would be built on top of.
//!
//! Start at [`executor::Executor`] for the scheduler, [`future::Future`]
//! for the polling contract, and [`timer::Timer`] for time-bounded futures.

pub mod error;
pub mod executor;
pub mod future;
pub mod list;
pub mod poll;
pub mod queue;
pub mod ring;
mod sync;
pub mod task;
pub mod timer;

pub use error::{ExecutorError, QueueError, RingError, TimeoutError, TimerError};
pub use executor::{Executor, ExecutorConfig};
pub use future::{BoxFuture, Future};
pub use list::{List, Node};
pub use poll::{Context, Poll, WakeData, Waker};
pub use queue::{LockFreeQueue, QueueMetrics};
pub use ring::RingBuffer;
pub use task::{Priority, Task, TaskHandle, TaskPoll, TaskState};
pub use timer::{Clock, DelayFuture, MonotonicClock, Timer, TimeoutFuture};
