//! Loom model checks for `RingBuffer`'s owner-pop vs. thief-steal race on
//! `head`. See `loom_queue.rs` for why this file is gated on `cfg(loom)`
//! and run separately from the crate's normal test suite.
#![cfg(loom)]

use loom::sync::Arc;
use loom::thread;
use mini_rt::{List, Node, RingBuffer};

fn list_of(values: &[u32]) -> List<u32> {
    let mut list = List::empty();
    for &v in values {
        list.append(List::from_node(Node::new(v)));
    }
    list
}

#[test]
fn owner_pop_and_thief_steal_never_observe_the_same_node() {
    loom::model(|| {
        let target = Arc::new(RingBuffer::new(4));
        target.push(list_of(&[1, 2])).unwrap();
        let thief: Arc<RingBuffer<u32>> = Arc::new(RingBuffer::new(4));

        let owner_target = target.clone();
        let owner = thread::spawn(move || owner_target.pop());

        let stealer_target = target.clone();
        let stealer_thief = thief.clone();
        let stealer = thread::spawn(move || stealer_thief.steal(&stealer_target));

        let popped = owner.join().unwrap();
        let stolen = stealer.join().unwrap();

        let mut values: Vec<u32> = Vec::new();
        if let Some(node) = popped {
            // SAFETY: uniquely observed by the owner thread above.
            values.push(unsafe { Box::from_raw(node) }.value);
        }
        if let Some((node, _)) = stolen {
            // SAFETY: uniquely observed by the stealer thread above.
            values.push(unsafe { Box::from_raw(node) }.value);
        }
        while let Some(node) = thief.pop() {
            // SAFETY: drained from the thief's own ring after the race.
            values.push(unsafe { Box::from_raw(node) }.value);
        }
        let total = values.len();
        values.sort();
        values.dedup();
        assert_eq!(values.len(), total, "no node observed twice");
        assert!(total <= 2, "only 2 nodes were ever pushed");
    });
}
