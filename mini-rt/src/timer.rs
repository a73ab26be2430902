//! The deadline registry and the time-bounded futures built on it:
//! [`DelayFuture`] and [`TimeoutFuture`].

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use crate::error::{TimeoutError, TimerError};
use crate::future::Future;
use crate::poll::{Context, Poll};

/// Nanoseconds since an arbitrary but monotonic epoch. 128 bits tolerates
/// `u64 seconds * 1_000_000_000` without overflow.
pub type Nanos = i128;

/// A source of monotonic time, abstracted so tests can supply a
/// deterministic fake clock instead of real wall-clock sleeps.
pub trait Clock {
    /// The current time, in nanoseconds since this clock's epoch. Must
    /// never go backwards between calls.
    fn now(&self) -> Nanos;
}

/// The default clock, backed by `std::time::Instant`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Nanos {
        self.epoch.elapsed().as_nanos() as Nanos
    }
}

/// Convenience conversions from common units to [`Nanos`] deltas.
pub mod duration {
    use super::Nanos;

    pub fn millis(n: i64) -> Nanos {
        (n as Nanos) * 1_000_000
    }

    pub fn secs(n: i64) -> Nanos {
        (n as Nanos) * 1_000_000_000
    }
}

struct Entry {
    id: u64,
    deadline: Nanos,
    waker: crate::poll::Waker,
}

struct TimerInner {
    entries: Vec<Entry>,
    next_id: u64,
}

/// An unsorted collection of `(deadline, waker)` registrations, processed
/// with a linear `process_expired` pass.
///
/// A binary heap or hierarchical timer wheel would make `process_expired`
/// sub-linear, but the expected live-entry count is small (bounded by
/// in-flight `DelayFuture`/`TimeoutFuture` instances), so the simpler
/// unsorted list is used; see the crate's design notes for when to revisit
/// this.
///
/// Cloning a `Timer` shares the same underlying registry (every clone sees
/// the same entries), which is what lets a [`DelayFuture`] and the
/// [`Timer`] handle passed to `run()` observe the same state.
#[derive(Clone)]
pub struct Timer<C: Clock = MonotonicClock> {
    inner: Rc<RefCell<TimerInner>>,
    clock: Rc<C>,
}

impl<C: Clock> Timer<C> {
    /// Build a new, empty timer driven by `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TimerInner {
                entries: Vec::new(),
                next_id: 1,
            })),
            clock: Rc::new(clock),
        }
    }

    /// The current time according to this timer's clock.
    pub fn now(&self) -> Nanos {
        self.clock.now()
    }

    /// Register a new `(deadline, waker)` pair. Returns the id used to
    /// `remove` it later.
    pub fn register(&self, deadline: Nanos, waker: crate::poll::Waker) -> Result<u64, TimerError> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(Entry { id, deadline, waker });
        tracing::trace!(timer_id = id, deadline, "registered timer entry");
        Ok(id)
    }

    /// Remove an entry by id. Silent no-op if `id` is not (or no longer)
    /// registered, so futures that may never have registered can call this
    /// unconditionally on drop.
    pub fn remove(&self, id: u64) {
        let mut inner = self.inner.borrow_mut();
        if let Some(pos) = inner.entries.iter().position(|e| e.id == id) {
            inner.entries.swap_remove(pos);
        }
    }

    /// Wake and remove every entry whose deadline has passed.
    ///
    /// Uses swap-remove with the index re-checked after each removal so the
    /// element swapped into the current slot isn't skipped. Ordering among
    /// the expired entries' wake-ups is unspecified.
    pub fn process_expired(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.borrow_mut();
        let mut i = 0;
        while i < inner.entries.len() {
            if inner.entries[i].deadline <= now {
                let entry = inner.entries.swap_remove(i);
                tracing::trace!(timer_id = entry.id, "timer entry expired, waking");
                entry.waker.wake();
                // do not advance `i`: the swapped-in element must be rechecked
            } else {
                i += 1;
            }
        }
    }

    /// The earliest deadline among all live entries, if any.
    pub fn next_deadline(&self) -> Option<Nanos> {
        self.inner.borrow().entries.iter().map(|e| e.deadline).min()
    }

    /// True if any entry has already passed its deadline.
    pub fn has_expired(&self) -> bool {
        let now = self.clock.now();
        self.inner.borrow().entries.iter().any(|e| e.deadline <= now)
    }

    /// Number of live (unexpired, unremoved) entries.
    pub fn count(&self) -> usize {
        self.inner.borrow().entries.len()
    }
}

impl Timer<MonotonicClock> {
    /// Build a new, empty timer driven by the real monotonic clock.
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::default())
    }
}

impl Default for Timer<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

/// A future that resolves once a deadline has passed.
pub struct DelayFuture<C: Clock = MonotonicClock> {
    timer: Timer<C>,
    deadline: Nanos,
    registered_id: Option<u64>,
}

impl<C: Clock> DelayFuture<C> {
    /// Build a delay that resolves at `deadline` (in the timer's clock's
    /// nanoseconds).
    pub fn new(timer: Timer<C>, deadline: Nanos) -> Self {
        Self {
            timer,
            deadline,
            registered_id: None,
        }
    }

    /// Build a delay that resolves `duration_ns` nanoseconds from now.
    pub fn after(timer: Timer<C>, duration_ns: Nanos) -> Self {
        let now = timer.now();
        Self::new(timer, now + duration_ns)
    }
}

impl<C: Clock> Future for DelayFuture<C> {
    type Output = ();

    fn poll(&mut self, ctx: &Context) -> Poll<()> {
        let now = self.timer.now();
        if now >= self.deadline {
            if let Some(id) = self.registered_id.take() {
                self.timer.remove(id);
            }
            return Poll::Ready(());
        }
        if self.registered_id.is_none() {
            match self.timer.register(self.deadline, ctx.waker().clone()) {
                Ok(id) => self.registered_id = Some(id),
                // Treat registration failure as immediately-ready: the
                // required default for resource-constrained paths.
                Err(_) => return Poll::Ready(()),
            }
        }
        Poll::Pending
    }
}

impl<C: Clock> Drop for DelayFuture<C> {
    fn drop(&mut self) {
        if let Some(id) = self.registered_id.take() {
            self.timer.remove(id);
        }
    }
}

/// Wraps an inner future with a deadline: whichever of "inner completes" or
/// "deadline passes" happens first determines the result.
pub struct TimeoutFuture<F: Future, C: Clock = MonotonicClock> {
    inner: F,
    timer: Timer<C>,
    deadline: Nanos,
    registered_id: Option<u64>,
    completed: bool,
}

impl<F: Future, C: Clock> TimeoutFuture<F, C> {
    /// Wrap `inner`, failing with [`TimeoutError`] if `deadline` passes
    /// before it completes.
    pub fn new(inner: F, timer: Timer<C>, deadline: Nanos) -> Self {
        Self {
            inner,
            timer,
            deadline,
            registered_id: None,
            completed: false,
        }
    }

    /// Wrap `inner`, failing if it hasn't completed within `duration_ns`
    /// nanoseconds from now.
    pub fn after(inner: F, timer: Timer<C>, duration_ns: Nanos) -> Self {
        let now = timer.now();
        Self::new(inner, timer, now + duration_ns)
    }

    fn clear_registration(&mut self) {
        if let Some(id) = self.registered_id.take() {
            self.timer.remove(id);
        }
    }
}

impl<F: Future, C: Clock> Future for TimeoutFuture<F, C> {
    type Output = Result<F::Output, TimeoutError>;

    fn poll(&mut self, ctx: &Context) -> Poll<Self::Output> {
        if self.completed {
            // Caller misuse: polling a completed future again. Documented,
            // not panicked on.
            return Poll::Pending;
        }

        let now = self.timer.now();
        if now >= self.deadline {
            self.completed = true;
            self.clear_registration();
            return Poll::Ready(Err(TimeoutError));
        }

        match self.inner.poll(ctx) {
            Poll::Ready(v) => {
                self.completed = true;
                self.clear_registration();
                Poll::Ready(Ok(v))
            }
            Poll::Pending => {
                if self.registered_id.is_none() {
                    match self.timer.register(self.deadline, ctx.waker().clone()) {
                        Ok(id) => self.registered_id = Some(id),
                        Err(_) => {
                            self.completed = true;
                            return Poll::Ready(Err(TimeoutError));
                        }
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl<F: Future, C: Clock> Drop for TimeoutFuture<F, C> {
    fn drop(&mut self) {
        self.clear_registration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{WakeData, Waker};
    use std::cell::Cell;
    use std::rc::Rc as StdRc;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct FakeClock(StdRc<Cell<Nanos>>);

    impl FakeClock {
        fn set(&self, t: Nanos) {
            self.0.set(t);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Nanos {
            self.0.get()
        }
    }

    fn noop_context() -> Context {
        Context::from_waker(Waker::new(Arc::new(|_: &WakeData| {}), Arc::new(WakeData { task_id: 0 })))
    }

    #[test]
    fn immediate_delay_is_ready_without_registering() {
        let clock = FakeClock::default();
        clock.set(duration::millis(5));
        let timer = Timer::with_clock(clock);
        let mut delay = DelayFuture::new(timer.clone(), duration::millis(4));
        assert_eq!(delay.poll(&noop_context()), Poll::Ready(()));
        assert_eq!(timer.count(), 0);
    }

    #[test]
    fn pending_delay_registers_exactly_once() {
        let clock = FakeClock::default();
        let timer = Timer::with_clock(clock);
        let mut delay = DelayFuture::new(timer.clone(), duration::secs(10));
        assert_eq!(delay.poll(&noop_context()), Poll::Pending);
        assert_eq!(timer.count(), 1);
        assert_eq!(delay.poll(&noop_context()), Poll::Pending);
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn drop_removes_live_registration() {
        let clock = FakeClock::default();
        let timer = Timer::with_clock(clock);
        let mut delay = DelayFuture::new(timer.clone(), duration::secs(10));
        delay.poll(&noop_context());
        assert_eq!(timer.count(), 1);
        drop(delay);
        assert_eq!(timer.count(), 0);
    }

    struct NeverReady;
    impl Future for NeverReady {
        type Output = ();
        fn poll(&mut self, _ctx: &Context) -> Poll<()> {
            Poll::Pending
        }
    }

    struct ReadyWith(Option<u32>);
    impl Future for ReadyWith {
        type Output = u32;
        fn poll(&mut self, _ctx: &Context) -> Poll<u32> {
            Poll::Ready(self.0.take().unwrap())
        }
    }

    #[test]
    fn timeout_fires_before_inner_completes() {
        let clock = FakeClock::default();
        clock.set(duration::millis(5));
        let timer = Timer::with_clock(clock);
        let mut timeout = TimeoutFuture::new(NeverReady, timer, duration::millis(4));
        assert_eq!(timeout.poll(&noop_context()), Poll::Ready(Err(TimeoutError)));
    }

    #[test]
    fn inner_future_wins_race() {
        let clock = FakeClock::default();
        let timer = Timer::with_clock(clock);
        let mut timeout = TimeoutFuture::new(ReadyWith(Some(42)), timer.clone(), duration::secs(10));
        assert_eq!(timeout.poll(&noop_context()), Poll::Ready(Ok(42)));
        assert_eq!(timer.count(), 0);
    }

    #[test]
    fn process_expired_wakes_only_past_deadlines() {
        use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

        let clock = FakeClock::default();
        let timer = Timer::with_clock(clock.clone());
        let woken_a = Arc::new(AtomicBool::new(false));
        let woken_b = Arc::new(AtomicBool::new(false));
        let wa = woken_a.clone();
        let wb = woken_b.clone();

        let waker_a = Waker::new(
            Arc::new(move |_: &WakeData| wa.store(true, AtomicOrdering::SeqCst)),
            Arc::new(WakeData { task_id: 1 }),
        );
        let waker_b = Waker::new(
            Arc::new(move |_: &WakeData| wb.store(true, AtomicOrdering::SeqCst)),
            Arc::new(WakeData { task_id: 2 }),
        );

        timer.register(duration::millis(10), waker_a).unwrap();
        timer.register(duration::millis(20), waker_b).unwrap();

        clock.set(duration::millis(15));
        timer.process_expired();

        assert!(woken_a.load(AtomicOrdering::SeqCst));
        assert!(!woken_b.load(AtomicOrdering::SeqCst));
        assert_eq!(timer.count(), 1);
    }
}
