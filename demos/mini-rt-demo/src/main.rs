//! Run with:
//! ```bash
//! cargo run -p mini-rt-demo
//! ```
//! Spawns tasks at different priorities plus one delayed task, then drives
//! them all to completion on a single-threaded [`Executor`].

use mini_rt::timer::duration;
use mini_rt::{Context, DelayFuture, Executor, Future, Poll, Priority};

struct PrintOnce(&'static str);

impl Future for PrintOnce {
    type Output = ();

    fn poll(&mut self, _ctx: &Context) -> Poll<()> {
        println!("{}", self.0);
        Poll::Ready(())
    }
}

struct AfterDelay {
    delay: DelayFuture,
    message: &'static str,
    done: bool,
}

impl Future for AfterDelay {
    type Output = ();

    fn poll(&mut self, ctx: &Context) -> Poll<()> {
        if self.done {
            return Poll::Ready(());
        }
        match self.delay.poll(ctx) {
            Poll::Ready(()) => {
                println!("{}", self.message);
                self.done = true;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut executor = Executor::new();
    let timer = executor.timer().clone();

    executor.spawn(PrintOnce("low priority task"), Priority::Low);
    executor.spawn(PrintOnce("critical priority task"), Priority::Critical);
    executor.spawn(PrintOnce("normal priority task"), Priority::Normal);
    executor.spawn(
        AfterDelay {
            delay: DelayFuture::after(timer, duration::millis(50)),
            message: "delayed task finally ran",
            done: false,
        },
        Priority::Normal,
    );

    executor.run().expect("executor is not already running");
    println!("all tasks finished");
}
