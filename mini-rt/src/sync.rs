//! Thin indirection over the atomics used by the lock-free primitives.
//!
//! Under `--cfg loom` the crate's own atomics are swapped for `loom`'s
//! model-checked equivalents so that `cargo test --cfg loom` can explore
//! interleavings of [`crate::queue::LockFreeQueue`] and
//! [`crate::ring::RingBuffer`]. Everything else in the crate is unaffected.

#[cfg(not(loom))]
pub use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

#[cfg(loom)]
pub use loom::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};
