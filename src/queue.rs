//! Bounded lock-free queues connecting the pipeline stages.
//!
//! Contract: non-blocking `try_pop` for consumers, blocking `push` for
//! producers. A full queue stalls the producer (this is the pipeline's
//! only backpressure mechanism), so capacity is generous.

use crossbeam_queue::ArrayQueue;
use std::time::Duration;

/// Default capacity of the task and output queues.
pub const QUEUE_CAPACITY: usize = 1 << 17;

/// Producers back off this long when the queue is full.
const PUSH_RETRY: Duration = Duration::from_micros(100);

pub struct BoundedQueue<T> {
    inner: ArrayQueue<T>,
}

impl<T> BoundedQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        BoundedQueue {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Push, sleeping briefly while the queue is full.
    pub fn push(&self, item: T) {
        let mut item = item;
        while let Err(rejected) = self.inner.push(item) {
            item = rejected;
            std::thread::sleep(PUSH_RETRY);
        }
    }

    /// Pop without blocking; `None` when the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_within_a_single_producer() {
        let queue = BoundedQueue::with_capacity(8);
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 5);
        for i in 0..5 {
            assert_eq!(queue.try_pop(), Some(i));
        }
        assert!(queue.try_pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_blocks_until_a_consumer_drains() {
        let queue = Arc::new(BoundedQueue::with_capacity(2));
        queue.push(0u32);
        queue.push(1);

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.push(2))
        };

        // Producer is stalled on the full queue until we pop.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.try_pop(), Some(0));
        producer.join().unwrap();
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
    }
}
