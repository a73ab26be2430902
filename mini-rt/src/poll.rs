//! The polling ABI shared by every future in this runtime: [`Poll`],
//! [`Waker`], and [`Context`].

use std::fmt;
use std::sync::Arc;

/// The outcome of a single [`crate::future::Future::poll`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll<T> {
    /// The future has produced its final value.
    Ready(T),
    /// The future cannot make progress yet; it has arranged to be woken.
    Pending,
}

impl<T> Poll<T> {
    /// True if this is `Ready(_)`.
    pub fn is_ready(&self) -> bool {
        matches!(self, Poll::Ready(_))
    }

    /// Map the ready value, passing `Pending` through unchanged.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Poll<U> {
        match self {
            Poll::Ready(v) => Poll::Ready(f(v)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The callable half of a waker: `wake_fn(data)` is invoked exactly as
/// given, with no interpretation of `data` by the core.
type WakeFn = dyn Fn(&WakeData) + Send + Sync;

/// Opaque payload passed to a [`Waker`]'s wake function. The core never
/// looks inside it; it exists only so the executor can thread the task id
/// (or, for a future work-stealing executor, a worker id) through to the
/// wake callback without allocating on every clone.
#[derive(Debug)]
pub struct WakeData {
    /// The scheduler-assigned id of the task this waker wakes.
    pub task_id: u64,
}

/// An immutable, cheaply-cloneable `(wake_fn, opaque_data)` pair.
///
/// Calling [`Waker::wake`] invokes the stored function with the stored data,
/// exactly as provided at construction. Wakers may be copied, stored, and
/// dropped without side effects; a dropped `Waker` never fires.
#[derive(Clone)]
pub struct Waker {
    wake_fn: Arc<WakeFn>,
    data: Arc<WakeData>,
}

impl Waker {
    /// Build a waker from a wake function and its opaque data.
    pub fn new(wake_fn: Arc<WakeFn>, data: Arc<WakeData>) -> Self {
        Self { wake_fn, data }
    }

    /// Invoke `wake_fn(data)`. May be called any number of times; callers
    /// must not assume a single invocation completes the wake-up (the
    /// executor's own `wake` is idempotent, but the waker itself is not
    /// required to dedupe).
    pub fn wake(&self) {
        (self.wake_fn)(&self.data);
    }

    /// The task id this waker targets, for diagnostics.
    pub fn task_id(&self) -> u64 {
        self.data.task_id
    }
}

impl fmt::Debug for Waker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waker").field("task_id", &self.data.task_id).finish()
    }
}

impl PartialEq for Waker {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.wake_fn, &other.wake_fn) && Arc::ptr_eq(&self.data, &other.data)
    }
}

/// A thin carrier holding the current [`Waker`], passed by value into every
/// `poll` call.
///
/// No other fields are required by the core today, but the type is kept
/// distinct from `Waker` itself so it can later grow a deadline hint or poll
/// budget without changing every future's signature.
#[derive(Clone, Debug)]
pub struct Context {
    waker: Waker,
}

impl Context {
    /// Build a context carrying the given waker.
    pub fn from_waker(waker: Waker) -> Self {
        Self { waker }
    }

    /// The waker this context carries.
    pub fn waker(&self) -> &Waker {
        &self.waker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_send<T: Send>() {}
    fn test_sync<T: Sync>() {}

    #[test]
    fn marker_traits() {
        test_send::<Waker>();
        test_sync::<Waker>();
        test_send::<Context>();
    }

    #[test]
    fn wake_invokes_fn_with_data_as_given() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let waker = Waker::new(
            Arc::new(move |data: &WakeData| {
                assert_eq!(data.task_id, 7);
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(WakeData { task_id: 7 }),
        );
        waker.wake();
        waker.wake();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_waker_is_a_no_op() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let waker = Waker::new(
            Arc::new(move |_: &WakeData| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(WakeData { task_id: 1 }),
        );
        drop(waker);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn poll_map_passes_pending_through() {
        let p: Poll<i32> = Poll::Pending;
        assert!(!p.map(|v| v + 1).is_ready());
        let r: Poll<i32> = Poll::Ready(1);
        assert_eq!(r.map(|v| v + 1), Poll::Ready(2));
    }
}
