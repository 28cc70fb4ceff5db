use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
};

/// Hand-off queue between the dispatcher and the worker pool.
///
/// Push never blocks; `pop` blocks while the queue is empty. Shutdown is a
/// `close()`: every waiter wakes, drains whatever is left and then gets
/// `None`, so workers exit without a poison value making the rounds.
#[derive(Debug)]
pub struct ReadyQueue<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Default for ReadyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReadyQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { items: VecDeque::new(), closed: false }),
            ready: Condvar::new(),
        }
    }

    /// Appends `v` and wakes one waiter. Pushes after `close` are dropped.
    pub fn push(&self, v: T) {
        let mut inner = self.inner.lock().expect("ready queue lock poisoned");
        if inner.closed {
            return;
        }
        inner.items.push_back(v);
        drop(inner);
        self.ready.notify_one();
    }

    /// Blocks until an element is available or the queue is closed.
    /// Returns `None` only when closed and empty.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("ready queue lock poisoned");
        loop {
            if let Some(v) = inner.items.pop_front() {
                return Some(v);
            }
            if inner.closed {
                return None;
            }
            inner = self.ready.wait(inner).expect("ready queue lock poisoned");
        }
    }

    /// Drops everything still queued.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("ready queue lock poisoned");
        inner.items.clear();
    }

    /// Marks the queue closed and wakes every waiter.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("ready queue lock poisoned");
        inner.closed = true;
        drop(inner);
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ready queue lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn fifo_order() {
        let q = ReadyQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn pop_blocks_until_push() {
        let q = Arc::new(ReadyQueue::new());
        let q2 = Arc::clone(&q);
        let consumer = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(20));
        q.push(7u64);
        assert_eq!(consumer.join().unwrap(), Some(7));
    }

    #[test]
    fn close_wakes_all_waiters() {
        let q: Arc<ReadyQueue<i32>> = Arc::new(ReadyQueue::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || q.pop())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        q.close();
        for w in waiters {
            assert_eq!(w.join().unwrap(), None);
        }
    }

    #[test]
    fn close_drains_remaining_items_first() {
        let q = ReadyQueue::new();
        q.push(1);
        q.push(2);
        q.close();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_after_close_is_dropped() {
        let q = ReadyQueue::new();
        q.close();
        q.push(9);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn clear_empties_queue() {
        let q = ReadyQueue::new();
        q.push(1);
        q.push(2);
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn many_producers_many_consumers() {
        const PER_PRODUCER: usize = 500;
        let q = Arc::new(ReadyQueue::new());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.push(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(v) = q.pop() {
                        got.push(v);
                    }
                    got
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        // Let consumers drain, then release them.
        while !q.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        q.close();

        let mut all: Vec<usize> = consumers.into_iter().flat_map(|c| c.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..4 * PER_PRODUCER).collect::<Vec<_>>());
    }
}
