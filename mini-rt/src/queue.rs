//! The shared multi-producer/multi-consumer LIFO queue used to hand work
//! between the per-worker [`RingBuffer`](crate::ring::RingBuffer)s of a
//! future work-stealing executor.
//!
//! The whole queue lives in one atomic, pointer-sized word: the top-of-stack
//! pointer with two flag bits, `HAS_CACHE` and `IS_CONSUMING`, stolen from
//! its low end. [`Node`](crate::list::Node)'s alignment (at least 4, since
//! it embeds a pointer) is exactly what makes those two bits free to steal.
//!
//! Pushing is plain MPMC: any number of producers CAS-loop a whole
//! already-linked [`List`] onto the top. Popping is serialized by the
//! `IS_CONSUMING` bit: only one thread at a time may be "the consumer",
//! and only that thread may read or write the non-atomic `cache` field,
//! which lets repeated pops avoid a fresh atomic swap on every call.

use std::cell::UnsafeCell;
use std::ptr;

use crate::error::QueueError;
use crate::list::{traverse_next, List, Node};
use crate::sync::{AtomicUsize, Ordering};

const HAS_CACHE: usize = 0b01;
const IS_CONSUMING: usize = 0b10;
const FLAGS_MASK: usize = HAS_CACHE | IS_CONSUMING;
const PTR_MASK: usize = !FLAGS_MASK;

/// Diagnostic, monotonic operation counters. Never consulted for
/// correctness; only for `tracing` events and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueMetrics {
    pub pushes: usize,
    pub push_retries: usize,
    pub cache_hits: usize,
    pub consumer_contentions: usize,
}

struct Counters {
    pushes: AtomicUsize,
    push_retries: AtomicUsize,
    cache_hits: AtomicUsize,
    consumer_contentions: AtomicUsize,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            pushes: AtomicUsize::new(0),
            push_retries: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            consumer_contentions: AtomicUsize::new(0),
        }
    }
}

/// The lock-free MPMC LIFO stack described above.
pub struct LockFreeQueue<T> {
    head: AtomicUsize,
    /// Valid only while a consumer holds `IS_CONSUMING`; producers never
    /// touch it.
    cache: UnsafeCell<*mut Node<T>>,
    counters: Counters,
}

// SAFETY: all mutable access to `cache` is gated by the `IS_CONSUMING` bit
// in `head`, which only one thread may hold at a time (enforced by the CAS
// protocol below), so `LockFreeQueue<T>` is safe to share across threads
// whenever `T` itself is.
unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeQueue<T> {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            cache: UnsafeCell::new(ptr::null_mut()),
            counters: Counters::default(),
        }
    }

    /// True if the queue currently holds no nodes and no consumer is active
    /// with a non-empty cache. Diagnostic only: the result may be stale
    /// the instant it's returned under concurrent access.
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        head & HAS_CACHE == 0 && head & PTR_MASK == 0
    }

    /// Push an already-linked, non-empty [`List`] onto the top of the
    /// stack in a single CAS.
    pub fn push(&self, list: List<T>) {
        if list.is_empty() {
            return;
        }
        let (list_head, list_tail) = list.into_raw_parts();
        let mut retries: u32 = 0;
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let top = (head & PTR_MASK) as *mut Node<T>;
            // SAFETY: `list_tail` is exclusively owned by this producer
            // (nothing else can observe it until the CAS below publishes
            // it), so linking its `next` is sound.
            unsafe { (*list_tail).set_next(top) };
            let new_head = (list_head as usize) | (head & FLAGS_MASK);
            match self
                .head
                .compare_exchange_weak(head, new_head, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(_) => {
                    retries += 1;
                    maybe_backoff(retries);
                    continue;
                }
            }
        }
        self.counters.pushes.fetch_add(1, Ordering::Relaxed);
        self.counters.push_retries.fetch_add(retries as usize, Ordering::Relaxed);
    }

    /// Attempt to become the exclusive consumer.
    ///
    /// On success, returns whatever chain was sitting in `cache` from a
    /// previous consumer session (null if none), which the caller should
    /// thread through [`Self::pop_from_consumer`] as its `local_cache`.
    pub fn try_acquire_consumer(&self) -> Result<*mut Node<T>, QueueError> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            if head & IS_CONSUMING != 0 {
                self.counters.consumer_contentions.fetch_add(1, Ordering::Relaxed);
                return Err(QueueError::Contended);
            }
            let has_cache = head & HAS_CACHE != 0;
            let ptr_bits = head & PTR_MASK;
            if !has_cache && ptr_bits == 0 {
                return Err(QueueError::Empty);
            }
            let new_head = if has_cache {
                head | IS_CONSUMING
            } else {
                HAS_CACHE | IS_CONSUMING
            };
            match self
                .head
                .compare_exchange_weak(head, new_head, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => {
                    let prior = if has_cache {
                        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                        // SAFETY: `IS_CONSUMING` just transitioned 0 -> 1
                        // under this CAS, so we are the sole consumer and
                        // may read `cache`.
                        unsafe { *self.cache.get() }
                    } else {
                        ptr_bits as *mut Node<T>
                    };
                    return Ok(prior);
                }
                Err(_) => continue,
            }
        }
    }

    /// The active consumer's private pop. `local_cache` is the consumer's
    /// running chain pointer, seeded from [`Self::try_acquire_consumer`]'s
    /// return value and threaded through repeated calls.
    ///
    /// # Safety
    /// The caller must currently hold the `IS_CONSUMING` latch (i.e. have
    /// an outstanding successful [`Self::try_acquire_consumer`] not yet
    /// matched by [`Self::release_consumer`]).
    pub unsafe fn pop_from_consumer(&self, local_cache: &mut *mut Node<T>) -> Option<*mut Node<T>> {
        if !local_cache.is_null() {
            let node = *local_cache;
            // SAFETY: `node` is live and exclusively reachable through the
            // consumer's private cache chain.
            *local_cache = (*node).next_ptr();
            return Some(node);
        }
        let prior = self.head.swap(HAS_CACHE | IS_CONSUMING, Ordering::Acquire);
        let prior_ptr = (prior & PTR_MASK) as *mut Node<T>;
        if prior_ptr.is_null() {
            return None;
        }
        // SAFETY: `prior_ptr` was published by a producer's `push`, which
        // linked its `next` before the CAS that made it visible here.
        *local_cache = (*prior_ptr).next_ptr();
        Some(prior_ptr)
    }

    /// Hand back consumer exclusivity, stashing `final_cache` (the
    /// consumer's unfinished chain, or null) for the next consumer.
    ///
    /// # Safety
    /// The caller must currently hold the `IS_CONSUMING` latch.
    pub unsafe fn release_consumer(&self, final_cache: *mut Node<T>) {
        // SAFETY: caller holds `IS_CONSUMING` exclusively.
        *self.cache.get() = final_cache;
        let sub = if final_cache.is_null() {
            HAS_CACHE | IS_CONSUMING
        } else {
            IS_CONSUMING
        };
        self.head.fetch_sub(sub, Ordering::Release);
    }

    /// Acquire-consume-release convenience path: pop a single node.
    pub fn pop(&self) -> Result<Box<Node<T>>, QueueError> {
        let mut local_cache = self.try_acquire_consumer()?;
        // SAFETY: we hold the latch we just acquired.
        let node = unsafe { self.pop_from_consumer(&mut local_cache) }
            .expect("try_acquire_consumer's prior is always non-null");
        // SAFETY: releasing the same latch we hold.
        unsafe { self.release_consumer(local_cache) };
        // SAFETY: `node` was produced by a producer's `push` of a boxed
        // node and has not been freed.
        Ok(unsafe { Box::from_raw(node) })
    }

    /// Snapshot of the diagnostic operation counters.
    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            pushes: self.counters.pushes.load(Ordering::Relaxed),
            push_retries: self.counters.push_retries.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            consumer_contentions: self.counters.consumer_contentions.load(Ordering::Relaxed),
        }
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let cached = *self.cache.get_mut();
        // SAFETY: `&mut self` guarantees no concurrent access; free both
        // the consumer-private cache chain and whatever remains under the
        // head pointer.
        unsafe {
            free_chain(cached);
            free_chain((head & PTR_MASK) as *mut Node<T>);
        }
    }
}

/// Backoff after a configured retry threshold. Adaptive in the sense that
/// it only kicks in once contention is observed; correctness never depends
/// on it.
fn maybe_backoff(retries: u32) {
    const THRESHOLD: u32 = 4;
    if retries > THRESHOLD {
        for _ in 0..(retries - THRESHOLD).min(32) {
            std::hint::spin_loop();
        }
    }
}

/// Free a null-terminated chain of boxed nodes.
///
/// # Safety
/// `head` must be null or point to a chain of live, uniquely-owned,
/// `Box`-allocated nodes.
unsafe fn free_chain<T>(mut head: *mut Node<T>) {
    while !head.is_null() {
        // SAFETY: `head` is non-null and, by this function's contract,
        // part of a live, uniquely-owned chain of boxed nodes.
        let next = unsafe { traverse_next(head) };
        drop(unsafe { Box::from_raw(head) });
        head = next;
    }
}
