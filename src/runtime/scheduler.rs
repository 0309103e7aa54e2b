//! Two-lane run queue shared by the worker threads.
//!
//! The queue has two lanes:
//! 1. Interrupt lane (highest priority): fibers woken to process an interruption
//! 2. Ready lane: every other runnable fiber or task, in FIFO order
//!
//! Workers block on a condition variable while both lanes are empty. Shutdown
//! wakes every worker and hands back whatever was still queued so the caller can
//! drop it outside the lock.

use crate::runtime::fiber_cell::FiberCell;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// A unit of work for a worker thread.
pub(crate) enum Job {
    /// Run the fiber until it suspends, yields or finishes.
    Fiber(Arc<FiberCell>),
    /// Run a one-off closure (e.g. polling a bridged future).
    Task(Box<dyn FnOnce() + Send>),
}

struct Lanes<T> {
    interrupt_lane: VecDeque<T>,
    ready_lane: VecDeque<T>,
    shutdown: bool,
}

/// A blocking multi-producer multi-consumer queue with an interrupt lane.
pub(crate) struct RunQueue<T> {
    lanes: Mutex<Lanes<T>>,
    available: Condvar,
}

/// The queue the runtime's workers pull from.
pub(crate) type Scheduler = RunQueue<Job>;

impl<T> RunQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                interrupt_lane: VecDeque::new(),
                ready_lane: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Queues work at the back of the ready lane.
    ///
    /// Work submitted after shutdown is handed back to the caller.
    pub(crate) fn schedule(&self, item: T) -> Option<T> {
        let mut lanes = self.lanes.lock();
        if lanes.shutdown {
            return Some(item);
        }
        lanes.ready_lane.push_back(item);
        drop(lanes);
        self.available.notify_one();
        None
    }

    /// Queues work in the interrupt lane, ahead of all ready work.
    pub(crate) fn schedule_interrupt(&self, item: T) -> Option<T> {
        let mut lanes = self.lanes.lock();
        if lanes.shutdown {
            return Some(item);
        }
        lanes.interrupt_lane.push_back(item);
        drop(lanes);
        self.available.notify_one();
        None
    }

    /// Pops the next item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been shut down.
    pub(crate) fn next(&self) -> Option<T> {
        let mut lanes = self.lanes.lock();
        loop {
            if lanes.shutdown {
                return None;
            }
            if let Some(item) = lanes
                .interrupt_lane
                .pop_front()
                .or_else(|| lanes.ready_lane.pop_front())
            {
                return Some(item);
            }
            self.available.wait(&mut lanes);
        }
    }

    /// Pops the next item without blocking.
    pub(crate) fn try_next(&self) -> Option<T> {
        let mut lanes = self.lanes.lock();
        lanes
            .interrupt_lane
            .pop_front()
            .or_else(|| lanes.ready_lane.pop_front())
    }

    /// Number of queued items across both lanes.
    pub(crate) fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.interrupt_lane.len() + lanes.ready_lane.len()
    }

    /// Stops the queue, wakes every waiter and returns the undelivered items.
    pub(crate) fn shutdown(&self) -> Vec<T> {
        let mut guard = self.lanes.lock();
        let lanes = &mut *guard;
        lanes.shutdown = true;
        let drained: Vec<T> = lanes
            .interrupt_lane
            .drain(..)
            .chain(lanes.ready_lane.drain(..))
            .collect();
        drop(guard);
        self.available.notify_all();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn interrupt_lane_has_priority() {
        let queue = RunQueue::new();
        assert!(queue.schedule(1).is_none());
        assert!(queue.schedule(2).is_none());
        assert!(queue.schedule_interrupt(3).is_none());

        assert_eq!(queue.try_next(), Some(3));
        assert_eq!(queue.try_next(), Some(1));
        assert_eq!(queue.try_next(), Some(2));
        assert_eq!(queue.try_next(), None);
    }

    #[test]
    fn ready_lane_is_fifo() {
        let queue = RunQueue::new();
        for i in 0..5 {
            queue.schedule(i);
        }
        assert_eq!(queue.len(), 5);
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_next()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn blocked_worker_wakes_on_schedule() {
        let queue = Arc::new(RunQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.next())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.schedule(42);
        assert_eq!(worker.join().unwrap(), Some(42));
    }

    #[test]
    fn shutdown_releases_waiters_and_drains() {
        let queue = Arc::new(RunQueue::new());
        queue.schedule(1);
        queue.schedule_interrupt(2);
        let drained = queue.shutdown();
        assert_eq!(drained, vec![2, 1]);
        assert_eq!(queue.next(), None);
        assert_eq!(queue.schedule(9), Some(9));
    }
}
