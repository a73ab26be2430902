//! The bounded, single-producer/multi-consumer per-worker queue a future
//! work-stealing executor would use for its local run queue.
//!
//! The owning worker is the sole producer (`push`) and may also consume
//! (`pop`); other workers only ever steal. A push that would exceed
//! capacity migrates half the buffer out to the shared
//! [`LockFreeQueue`](crate::queue::LockFreeQueue) instead of growing,
//! which keeps the ring's memory footprint fixed regardless of burst size.

use std::ptr;

use crate::error::{QueueError, RingError};
use crate::list::{List, Node};
use crate::queue::LockFreeQueue;
use crate::sync::{AtomicPtr, AtomicU32, Ordering};

/// A fixed-capacity, power-of-two-sized SPMC ring buffer of `Node<T>`
/// pointers.
pub struct RingBuffer<T> {
    head: AtomicU32,
    tail: AtomicU32,
    mask: u32,
    slots: Box<[AtomicPtr<Node<T>>]>,
}

impl<T> RingBuffer<T> {
    /// Build a new, empty ring. `capacity` must be a power of two.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "ring buffer capacity must be a power of two");
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            mask: capacity - 1,
            slots,
        }
    }

    /// The ring's fixed capacity.
    pub fn capacity(&self) -> u32 {
        self.mask + 1
    }

    /// Current occupancy. Diagnostic: may be stale the instant it's read
    /// under concurrent access.
    pub fn len(&self) -> u32 {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }

    /// True if the ring currently holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, index: u32) -> usize {
        (index & self.mask) as usize
    }

    /// Push `list`'s nodes onto the tail, one at a time. If the ring fills
    /// up mid-push, half of it (by the design's halving rule) is migrated
    /// out to the caller as [`RingError::Overflow`], which the caller must
    /// forward to the shared [`LockFreeQueue`].
    pub fn push(&self, mut list: List<T>) -> Result<(), RingError<T>> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            if list.is_empty() {
                self.tail.store(tail, Ordering::Release);
                return Ok(());
            }
            let head = self.head.load(Ordering::Acquire);
            let size = tail.wrapping_sub(head);
            if size >= self.capacity() {
                // Publish whatever has already been written before
                // attempting the migration, so the invariant
                // `0 <= tail - head <= C` never appears violated to a
                // concurrent observer.
                self.tail.store(tail, Ordering::Release);
                let migrate = (size / 2).max(1);
                match self.head.compare_exchange(
                    head,
                    head.wrapping_add(migrate),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let migrated = self.drain_slots_as_list(head, migrate);
                        let mut combined = migrated;
                        combined.prepend(list);
                        let spilled_len = combined.count();
                        return Err(RingError::Overflow {
                            spilled_len,
                            spilled: combined,
                        });
                    }
                    Err(_) => continue,
                }
            }
            // SAFETY: `list` is non-empty, checked above.
            let node = list.pop_front_raw().expect("list checked non-empty");
            self.slots[self.slot(tail)].store(node, Ordering::Relaxed);
            tail = tail.wrapping_add(1);
        }
    }

    /// Read back `count` slots starting at `start` and link them into a
    /// fresh [`List`], in order.
    fn drain_slots_as_list(&self, start: u32, count: u32) -> List<T> {
        if count == 0 {
            return List::empty();
        }
        let mut head_ptr: *mut Node<T> = ptr::null_mut();
        let mut prev: *mut Node<T> = ptr::null_mut();
        for i in 0..count {
            let node = self.slots[self.slot(start.wrapping_add(i))].load(Ordering::Relaxed);
            if prev.is_null() {
                head_ptr = node;
            } else {
                // SAFETY: `prev` was just read as a live node from a slot
                // this producer exclusively owns.
                unsafe { (*prev).set_next(node) };
            }
            prev = node;
        }
        // SAFETY: `prev` is the last node read above; terminate the chain.
        unsafe { (*prev).set_next(ptr::null_mut()) };
        // SAFETY: `head_ptr`/`prev` were just linked into a well-formed,
        // null-terminated chain above.
        unsafe { List::from_raw_parts(head_ptr, prev) }
    }

    /// The owner's pop. Contends with `steal` on `head`, not `tail`.
    pub fn pop(&self) -> Option<*mut Node<T>> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Relaxed);
            if tail.wrapping_sub(head) == 0 {
                return None;
            }
            match self.head.compare_exchange_weak(
                head,
                head.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(self.slots[self.slot(head)].load(Ordering::Acquire)),
                Err(_) => continue,
            }
        }
    }

    /// Steal roughly half of `target`'s nodes into `self`, which must be
    /// empty. Returns the node to run directly and whether any further
    /// nodes were retained in `self`'s buffer.
    pub fn steal(&self, target: &RingBuffer<T>) -> Option<(*mut Node<T>, bool)> {
        debug_assert!(self.is_empty(), "stealer's ring buffer must be empty");
        loop {
            let head = target.head.load(Ordering::Acquire);
            let tail = target.tail.load(Ordering::Acquire);
            let size = tail.wrapping_sub(head);
            if size == 0 {
                return None;
            }
            if size > target.capacity() {
                // Racy overread of head/tail mid-update; retry.
                continue;
            }
            let steal_count = size - size / 2;
            let our_tail = self.tail.load(Ordering::Relaxed);
            // The oldest stolen node (at `head`) is returned directly to
            // run; the rest are copied into this ring, oldest-first.
            let returned = target.slots[target.slot(head)].load(Ordering::Relaxed);
            for i in 1..steal_count {
                let node = target.slots[target.slot(head.wrapping_add(i))].load(Ordering::Relaxed);
                self.slots[self.slot(our_tail.wrapping_add(i - 1))].store(node, Ordering::Relaxed);
            }
            match target.head.compare_exchange(
                head,
                head.wrapping_add(steal_count),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let pushed_to_buffer = steal_count > 1;
                    if pushed_to_buffer {
                        self.tail
                            .store(our_tail.wrapping_add(steal_count - 1), Ordering::Release);
                    }
                    return Some((returned, pushed_to_buffer));
                }
                Err(_) => continue,
            }
        }
    }

    /// When `self` is empty, drain up to [`Self::capacity`] nodes from the
    /// shared `queue` to fill `self`, and return one additional node for
    /// the caller to run directly.
    pub fn consume(&self, queue: &LockFreeQueue<T>) -> Result<Option<(*mut Node<T>, bool)>, QueueError> {
        let mut local_cache = queue.try_acquire_consumer()?;
        let our_tail = self.tail.load(Ordering::Relaxed);
        let mut filled: u32 = 0;
        let mut direct: Option<*mut Node<T>> = None;

        // SAFETY: `try_acquire_consumer` above succeeded, so we hold the
        // `IS_CONSUMING` latch for the duration of this loop.
        while let Some(node) = unsafe { queue.pop_from_consumer(&mut local_cache) } {
            if direct.is_none() {
                direct = Some(node);
                continue;
            }
            self.slots[self.slot(our_tail.wrapping_add(filled))].store(node, Ordering::Relaxed);
            filled += 1;
            if filled >= self.capacity() {
                break;
            }
        }

        // SAFETY: releasing the same latch acquired above.
        unsafe { queue.release_consumer(local_cache) };

        if filled > 0 {
            self.tail.store(our_tail.wrapping_add(filled), Ordering::Release);
        }

        Ok(direct.map(|node| (node, filled > 0)))
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let mut i = head;
        while i != tail {
            let node = self.slots[self.slot(i)].load(Ordering::Relaxed);
            if !node.is_null() {
                // SAFETY: `&mut self` guarantees no concurrent access, and
                // `node` is a live, uniquely-owned boxed node.
                drop(unsafe { Box::from_raw(node) });
            }
            i = i.wrapping_add(1);
        }
    }
}
