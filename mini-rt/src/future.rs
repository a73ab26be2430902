//! The `Future` trait: a state machine asked "are you done?" via `poll`.
//!
//! Unlike `std::future::Future`, polling here takes a [`Context`] by value
//! (cheap: it's one `Arc` clone) rather than `Pin<&mut Self>` plus a
//! separately-threaded context, since this runtime has no language-level
//! `await` and every future here is already a hand-written state machine
//! that does not rely on self-referential borrows across `poll` calls.

use crate::poll::{Context, Poll};

/// Something that can be polled for progress and cleaned up on drop.
///
/// Implementors are expected to be cheap to poll repeatedly; a `Pending`
/// result must not perform any externally observable mutation beyond
/// registering at most one new waker with whatever it's waiting on.
pub trait Future {
    /// The value produced once this future completes.
    type Output;

    /// Ask whether the future is done. `Pending` means the future has
    /// arranged (or will arrange before returning) to call
    /// `ctx.waker().wake()` once progress is possible again.
    fn poll(&mut self, ctx: &Context) -> Poll<Self::Output>;
}

/// A boxed, type-erased future, so an executor can hold many different
/// concrete future types in one collection.
///
/// Not `Send`: the executor this runtime specifies is single-threaded, and
/// [`crate::timer::Timer`]-backed futures hold an `Rc`, so requiring `Send`
/// here would make timers unusable with tasks.
pub type BoxFuture<T> = Box<dyn Future<Output = T>>;

impl<T> Future for BoxFuture<T> {
    type Output = T;

    fn poll(&mut self, ctx: &Context) -> Poll<T> {
        (**self).poll(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{WakeData, Waker};
    use std::sync::Arc;

    struct ReadyOnce(bool);

    impl Future for ReadyOnce {
        type Output = u32;
        fn poll(&mut self, _ctx: &Context) -> Poll<u32> {
            if self.0 {
                Poll::Ready(42)
            } else {
                self.0 = true;
                Poll::Pending
            }
        }
    }

    fn noop_context() -> Context {
        Context::from_waker(Waker::new(Arc::new(|_: &WakeData| {}), Arc::new(WakeData { task_id: 0 })))
    }

    #[test]
    fn box_future_forwards_poll() {
        let mut boxed: BoxFuture<u32> = Box::new(ReadyOnce(false));
        let ctx = noop_context();
        assert_eq!(boxed.poll(&ctx), Poll::Pending);
        assert_eq!(boxed.poll(&ctx), Poll::Ready(42));
    }
}
