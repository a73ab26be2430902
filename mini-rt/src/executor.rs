//! The single-threaded, cooperative [`Executor`]: a strict-priority ready
//! set, a pending set for tasks awaiting a wake-up, and the timer
//! integration that drives time-bounded futures.
//!
//! Waking happens through the same [`LockFreeQueue`] used elsewhere in this
//! crate for the future work-stealing executor's inter-worker handoff: a
//! task's [`Waker`] is `Send + Sync` (any thread may hold and call one) even
//! though only this executor's own thread ever drains the queue it feeds.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ExecutorError, QueueError};
use crate::future::Future;
use crate::list::{List, Node};
use crate::poll::{Context, WakeData, Waker};
use crate::queue::LockFreeQueue;
use crate::task::{Priority, Task, TaskHandle, TaskPoll, TaskState};
use crate::timer::{Clock, MonotonicClock, Timer};

const PRIORITY_LEVELS: usize = 4;

fn priority_index(p: Priority) -> usize {
    match p {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
        Priority::Critical => 3,
    }
}

/// Executor-wide settings that don't affect scheduling semantics.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Used only to label this executor's `tracing` spans, so a process
    /// running more than one executor can tell their logs apart.
    pub name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { name: "executor".to_string() }
    }
}

/// A single-threaded, priority-scheduled, cooperative task runner.
///
/// Higher [`Priority`] tasks always run before lower ones; tasks at the
/// same level run in the order they became ready (FIFO), whether that's
/// their original spawn order or the order in which they were woken.
pub struct Executor<C: Clock = MonotonicClock> {
    config: ExecutorConfig,
    tasks: HashMap<u64, Task>,
    ready: [VecDeque<u64>; PRIORITY_LEVELS],
    pending: HashSet<u64>,
    wake_queue: Arc<LockFreeQueue<u64>>,
    next_id: u64,
    timer: Timer<C>,
    running: bool,
}

impl Executor<MonotonicClock> {
    /// A new executor with default config, driven by the real clock.
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// A new executor with the given config, driven by the real clock.
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self::with_clock(config, MonotonicClock::default())
    }
}

impl Default for Executor<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Executor<C> {
    /// A new executor driven by an arbitrary [`Clock`] (tests supply a fake
    /// one for deterministic timer behavior).
    pub fn with_clock(config: ExecutorConfig, clock: C) -> Self {
        Self {
            config,
            tasks: HashMap::new(),
            ready: Default::default(),
            pending: HashSet::new(),
            wake_queue: Arc::new(LockFreeQueue::new()),
            next_id: 1,
            timer: Timer::with_clock(clock),
            running: false,
        }
    }

    /// The timer registry this executor drives. Clone it to build
    /// [`crate::timer::DelayFuture`]/[`crate::timer::TimeoutFuture`]
    /// instances for spawned tasks.
    pub fn timer(&self) -> &Timer<C> {
        &self.timer
    }

    /// Spawn a future as a new task at the given priority, returning a
    /// handle for querying its state.
    pub fn spawn<F>(&mut self, future: F, priority: Priority) -> TaskHandle
    where
        F: Future<Output = ()> + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        let task = Task::from_future(future, id, priority);
        self.tasks.insert(id, task);
        self.ready[priority_index(priority)].push_back(id);
        tracing::debug!(executor = %self.config.name, task_id = id, ?priority, "task spawned");
        TaskHandle { id }
    }

    /// This handle's task's current state, or `None` if it has already
    /// completed or panicked (and so was dropped from the task table).
    pub fn state(&self, handle: TaskHandle) -> Option<TaskState> {
        self.tasks.get(&handle.id()).map(Task::state)
    }

    /// True once every spawned task has either completed or panicked.
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wake a task directly by id, as if its [`Waker`] had fired. Exposed
    /// for callers that hold a task id but not its `Waker` (tests, or a
    /// supervisor task waking a child it knows the id of).
    pub fn wake(&self, task_id: u64) {
        self.wake_queue.push(List::from_node(Node::new(task_id)));
    }

    fn make_waker(&self, task_id: u64) -> Waker {
        let queue = self.wake_queue.clone();
        Waker::new(
            Arc::new(move |data: &WakeData| {
                queue.push(List::from_node(Node::new(data.task_id)));
            }),
            Arc::new(WakeData { task_id }),
        )
    }

    /// Move every task a wake-up has arrived for from `pending` back onto
    /// its priority's ready queue. A wake for a task that is not currently
    /// pending (already ready, or already gone) is silently dropped, since
    /// wakers are allowed to fire more than once.
    fn drain_wake_queue(&mut self) {
        loop {
            match self.wake_queue.pop() {
                Ok(node) => {
                    let id = node.value;
                    if self.pending.remove(&id) {
                        if let Some(task) = self.tasks.get(&id) {
                            self.ready[priority_index(task.priority())].push_back(id);
                        }
                    }
                }
                Err(QueueError::Empty) => break,
                Err(QueueError::Contended) => continue,
            }
        }
    }

    fn next_ready(&mut self) -> Option<u64> {
        for level in self.ready.iter_mut().rev() {
            if let Some(id) = level.pop_front() {
                return Some(id);
            }
        }
        None
    }

    fn run_one(&mut self, id: u64) {
        let waker = self.make_waker(id);
        let ctx = Context::from_waker(waker);
        let task = self.tasks.get_mut(&id).expect("a ready task id must still be in the task table");
        task.set_state(TaskState::Running);
        let priority = task.priority();
        let span = tracing::debug_span!("poll_task", executor = %self.config.name, task_id = id, ?priority);
        let _enter = span.enter();
        match task.poll(&ctx) {
            TaskPoll::Ready => {
                task.set_state(TaskState::Completed);
                tracing::debug!(task_id = id, "task completed");
                self.tasks.remove(&id);
            }
            TaskPoll::Pending => {
                task.set_state(TaskState::Pending);
                self.pending.insert(id);
            }
            TaskPoll::Panicked => {
                task.set_state(TaskState::Failed);
                self.tasks.remove(&id);
            }
        }
    }

    /// Run one scheduling step: process expired timers, drain pending
    /// wake-ups, and poll at most one ready task (the highest-priority,
    /// longest-waiting one). Returns whether a task was polled.
    pub fn step(&mut self) -> bool {
        self.timer.process_expired();
        self.drain_wake_queue();
        match self.next_ready() {
            Some(id) => {
                self.run_one(id);
                true
            }
            None => false,
        }
    }

    /// Drive every spawned task to completion.
    ///
    /// Returns [`ExecutorError::AlreadyRunning`] immediately if called while
    /// this executor is already inside a `run()` call (a task's poll must
    /// never re-enter the executor that's driving it).
    pub fn run(&mut self) -> Result<(), ExecutorError> {
        if self.running {
            return Err(ExecutorError::AlreadyRunning);
        }
        self.running = true;
        let span = tracing::info_span!("executor_run", name = %self.config.name);
        let _enter = span.enter();

        loop {
            if self.step() {
                continue;
            }
            if self.tasks.is_empty() {
                break;
            }
            // Nothing is ready right now, but tasks remain pending. Park
            // until the next timer deadline instead of busy-spinning.
            match self.timer.next_deadline() {
                Some(deadline) => {
                    let now = self.timer.now();
                    let remaining = (deadline - now).max(0) as u64;
                    if remaining > 0 {
                        std::thread::sleep(Duration::from_nanos(remaining));
                    }
                }
                None => {
                    // No timer will ever wake these tasks from inside this
                    // loop; only an external wake() can. Nothing left to do.
                    tracing::warn!(
                        executor = %self.config.name,
                        pending = self.pending.len(),
                        "run() idle with pending tasks and no timers; returning"
                    );
                    break;
                }
            }
        }

        self.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::Poll;
    use crate::timer::duration;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct FakeClock(Rc<Cell<i128>>);

    impl FakeClock {
        fn set(&self, t: i128) {
            self.0.set(t);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> i128 {
            self.0.get()
        }
    }

    struct RecordOnce {
        label: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Future for RecordOnce {
        type Output = ();
        fn poll(&mut self, _ctx: &Context) -> Poll<()> {
            self.log.borrow_mut().push(self.label);
            Poll::Ready(())
        }
    }

    struct ManualFuture {
        ready: Rc<Cell<bool>>,
        waker_slot: Rc<RefCell<Option<Waker>>>,
    }

    impl Future for ManualFuture {
        type Output = ();
        fn poll(&mut self, ctx: &Context) -> Poll<()> {
            if self.ready.get() {
                Poll::Ready(())
            } else {
                *self.waker_slot.borrow_mut() = Some(ctx.waker().clone());
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
    fn ready_tasks_run_highest_priority_first() {
        let mut executor = Executor::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        executor.spawn(RecordOnce { label: "low", log: log.clone() }, Priority::Low);
        executor.spawn(RecordOnce { label: "critical", log: log.clone() }, Priority::Critical);
        executor.spawn(RecordOnce { label: "normal", log: log.clone() }, Priority::Normal);
        executor.run().unwrap();
        assert_eq!(*log.borrow(), vec!["critical", "normal", "low"]);
    }

    #[test]
    fn fifo_order_within_same_priority() {
        let mut executor = Executor::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        executor.spawn(RecordOnce { label: "a", log: log.clone() }, Priority::Normal);
        executor.spawn(RecordOnce { label: "b", log: log.clone() }, Priority::Normal);
        executor.spawn(RecordOnce { label: "c", log: log.clone() }, Priority::Normal);
        executor.run().unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn panicking_task_does_not_stop_others() {
        let mut executor = Executor::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        executor.spawn(AlwaysPanics, Priority::Normal);
        let ok = executor.spawn(RecordOnce { label: "ok", log: log.clone() }, Priority::Normal);
        executor.run().unwrap();
        assert_eq!(*log.borrow(), vec!["ok"]);
        assert_eq!(executor.state(ok), None);
    }

    #[test]
    fn wake_resumes_pending_task() {
        let mut executor = Executor::new();
        let ready = Rc::new(Cell::new(false));
        let waker_slot: Rc<RefCell<Option<Waker>>> = Rc::new(RefCell::new(None));
        let handle = executor.spawn(
            ManualFuture { ready: ready.clone(), waker_slot: waker_slot.clone() },
            Priority::Normal,
        );

        assert!(executor.step());
        assert_eq!(executor.state(handle), Some(TaskState::Pending));

        ready.set(true);
        let waker = waker_slot.borrow_mut().take().expect("poll must have stored a waker");
        waker.wake();

        assert!(executor.step());
        assert_eq!(executor.state(handle), None);
    }

    #[test]
    fn waking_an_already_ready_task_is_harmless() {
        let mut executor = Executor::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = executor.spawn(RecordOnce { label: "x", log: log.clone() }, Priority::Normal);
        executor.wake(handle.id());
        executor.wake(handle.id());
        executor.run().unwrap();
        assert_eq!(*log.borrow(), vec!["x"]);
    }

    #[test]
    fn delay_future_resumes_task_once_clock_passes_deadline() {
        let clock = FakeClock::default();
        let mut executor: Executor<FakeClock> = Executor::with_clock(ExecutorConfig::default(), clock.clone());
        let timer = executor.timer().clone();
        let handle = executor.spawn(crate::timer::DelayFuture::new(timer, duration::millis(10)), Priority::Normal);

        assert!(executor.step());
        assert_eq!(executor.state(handle), Some(TaskState::Pending));

        clock.set(duration::millis(11));
        assert!(executor.step());
        assert_eq!(executor.state(handle), None);
    }

    #[test]
    fn run_rejects_reentrant_call() {
        let mut executor = Executor::new();
        executor.running = true;
        assert_eq!(executor.run().unwrap_err(), ExecutorError::AlreadyRunning);
        executor.running = false;
    }

    #[test]
    fn is_idle_reflects_outstanding_tasks() {
        let mut executor = Executor::new();
        assert!(executor.is_idle());
        let log = Rc::new(RefCell::new(Vec::new()));
        executor.spawn(RecordOnce { label: "x", log }, Priority::Normal);
        assert!(!executor.is_idle());
        executor.run().unwrap();
        assert!(executor.is_idle());
    }
}
