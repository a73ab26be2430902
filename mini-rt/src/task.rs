//! The scheduler-visible [`Task`]: an erased, unit-typed future plus the
//! bookkeeping the executor needs to drive it.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::future::{BoxFuture, Future};
use crate::poll::{Context, Poll};

/// Strict scheduling priority. Higher variants are always polled before
/// lower ones; ordering *within* a priority level is insertion order (see
/// [`crate::executor::Executor`]).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Where a [`Task`] currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Pending,
    Completed,
    Failed,
}

/// A unique, executor-scoped task identity, handed back from
/// [`crate::executor::Executor::spawn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle {
    pub(crate) id: u64,
}

impl TaskHandle {
    /// The raw task id this handle refers to.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// An executor's record for one spawned future.
///
/// The wrapped future's result type is always `()`: the executor only cares
/// whether a task finished, not what it produced (a task that needs to
/// communicate a value back to its spawner does so through its own channel,
/// outside the scope of this core).
pub struct Task {
    id: u64,
    priority: Priority,
    state: TaskState,
    future: BoxFuture<()>,
}

impl Task {
    /// Wrap a future of any output type as a unit-typed scheduler `Task`.
    ///
    /// The inner future's `Ready(_)` is converted to `Ready(())`; its value
    /// is discarded (reporting it is a future extension via richer task
    /// handles).
    pub fn from_future<F>(future: F, id: u64, priority: Priority) -> Self
    where
        F: Future + 'static,
    {
        let erased: BoxFuture<()> = Box::new(DiscardOutput(future));
        Self {
            id,
            priority,
            state: TaskState::Ready,
            future: erased,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    /// Poll the wrapped future, isolating any panic it unwinds with.
    ///
    /// A panicking poll is reported as `Poll::Ready(())` with the task left
    /// for the caller to mark `Failed` (see
    /// [`crate::executor::Executor::step`]); the panic itself is logged via
    /// `tracing::error!` and never propagated out of this call.
    pub fn poll(&mut self, ctx: &Context) -> TaskPoll {
        let future = &mut self.future;
        match catch_unwind(AssertUnwindSafe(|| future.poll(ctx))) {
            Ok(Poll::Ready(())) => TaskPoll::Ready,
            Ok(Poll::Pending) => TaskPoll::Pending,
            Err(payload) => {
                let message = panic_message(&payload);
                tracing::error!(task_id = self.id, panic = %message, "task panicked during poll");
                TaskPoll::Panicked
            }
        }
    }
}

/// The three things a [`Task::poll`] call can report, one step more refined
/// than [`Poll`] because a panic is distinguished from a clean `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPoll {
    Ready,
    Pending,
    Panicked,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .finish()
    }
}

/// Adapts a `Future<Output = T>` into a `Future<Output = ()>` by discarding
/// the produced value.
struct DiscardOutput<F>(F);

impl<F: Future> Future for DiscardOutput<F> {
    type Output = ();
    fn poll(&mut self, ctx: &Context) -> Poll<()> {
        self.0.poll(ctx).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{WakeData, Waker};
    use std::sync::Arc;

    fn noop_context() -> Context {
        Context::from_waker(Waker::new(Arc::new(|_: &WakeData| {}), Arc::new(WakeData { task_id: 0 })))
    }

    struct ReadyOnce(bool);
    impl Future for ReadyOnce {
        type Output = u32;
        fn poll(&mut self, _ctx: &Context) -> Poll<u32> {
            if self.0 {
                Poll::Ready(1)
            } else {
                self.0 = true;
                Poll::Pending
            }
        }
    }

    struct AlwaysPanics;
    impl Future for AlwaysPanics {
        type Output = ();
        fn poll(&mut self, _ctx: &Context) -> Poll<()> {
            panic!("boom");
        }
    }

    #[test]
    fn poll_converts_ready_value_to_unit() {
        let mut task = Task::from_future(ReadyOnce(false), 1, Priority::Normal);
        let ctx = noop_context();
        assert_eq!(task.poll(&ctx), TaskPoll::Pending);
        assert_eq!(task.poll(&ctx), TaskPoll::Ready);
    }

    #[test]
    fn panicking_future_is_isolated() {
        let mut task = Task::from_future(AlwaysPanics, 1, Priority::Normal);
        let ctx = noop_context();
        assert_eq!(task.poll(&ctx), TaskPoll::Panicked);
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
