//! Bounded MPMC queue with close semantics.

use chainmesh_types::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A blocking multi-producer multi-consumer queue.
///
/// `push` blocks while the queue is at capacity; `wait_pop` blocks while it is
/// empty. `close` wakes every waiter: blocked pushers fail with `Cancelled`,
/// and poppers drain the remaining items before `wait_pop` starts failing with
/// `Cancelled` as well.
pub struct ConcurrentQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> ConcurrentQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append an item, blocking while the queue is full.
    ///
    /// Fails with `Cancelled` once the queue has been closed; the item is
    /// returned to the caller implicitly by the move not happening.
    pub fn push(&self, item: T) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while !state.closed && state.items.len() >= self.capacity {
            state = self.not_full.wait(state).unwrap();
        }
        if state.closed {
            return Err(Error::cancelled("queue is closed"));
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the front item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Remove the front item, blocking until one is available.
    ///
    /// Fails with `Cancelled` when the queue is closed and empty; worker loops
    /// treat this as the shutdown signal.
    pub fn wait_pop(&self) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        while !state.closed && state.items.is_empty() {
            state = self.not_empty.wait(state).unwrap();
        }
        match state.items.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                Ok(item)
            }
            None => Err(Error::cancelled("queue is closed and empty")),
        }
    }

    /// Close the queue and wake every waiter. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmesh_types::ErrorKind;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_push_pop_fifo() {
        let q = ConcurrentQueue::bounded(8);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.wait_pop().unwrap(), 1);
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.wait_pop().unwrap(), 3);
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_wait_pop_unblocks_on_close() {
        let q = Arc::new(ConcurrentQueue::<u32>::bounded(4));
        let popper = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        let err = popper.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_close_drains_remaining_items() {
        let q = ConcurrentQueue::bounded(4);
        q.push("a").unwrap();
        q.push("b").unwrap();
        q.close();
        // Items already queued remain poppable after close.
        assert_eq!(q.wait_pop().unwrap(), "a");
        assert_eq!(q.wait_pop().unwrap(), "b");
        assert_eq!(q.wait_pop().unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(q.push("c").is_err());
    }

    #[test]
    fn test_push_blocks_at_capacity() {
        let q = Arc::new(ConcurrentQueue::bounded(1));
        q.push(1u32).unwrap();
        let pusher = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(2))
        };
        thread::sleep(Duration::from_millis(20));
        // The pusher is parked on a full queue; popping releases it.
        assert_eq!(q.try_pop(), Some(1));
        pusher.join().unwrap().unwrap();
        assert_eq!(q.try_pop(), Some(2));
    }

    #[test]
    fn test_mpmc_all_items_delivered_once() {
        let q = Arc::new(ConcurrentQueue::bounded(16));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..100u32 {
                        q.push(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(v) = q.wait_pop() {
                        seen.push(v);
                    }
                    seen
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        q.close();
        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        let mut expected: Vec<u32> = (0..4).flat_map(|p| (0..100).map(move |i| p * 1000 + i)).collect();
        expected.sort_unstable();
        assert_eq!(all, expected);
    }
}
