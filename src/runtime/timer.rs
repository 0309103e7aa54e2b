//! Timer heap and the driver thread that fires it.
//!
//! [`TimerHeap`] is a min-heap of deadlines. Cancellation removes the callback
//! and leaves the heap entry behind; stale entries are skipped when they reach
//! the top, and pruned in bulk once they outnumber the live ones. [`TimerDriver`] owns a heap behind a mutex and runs on a dedicated
//! thread, sleeping until the earliest deadline and invoking expired callbacks
//! outside the lock.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub(crate) type TimerCallback = Box<dyn FnOnce() + Send>;

/// Below this many heap entries cancelled timers are never pruned eagerly.
const PRUNE_THRESHOLD: usize = 64;

/// Handle for cancelling a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Instant,
    /// Generation doubles as the timer id and breaks deadline ties FIFO.
    generation: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by deadline.
#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    callbacks: HashMap<u64, TimerCallback>,
    next_generation: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of live (not cancelled, not fired) timers.
    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub(crate) fn insert(&mut self, deadline: Instant, callback: TimerCallback) -> TimerId {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
        });
        self.callbacks.insert(generation, callback);
        TimerId(generation)
    }

    /// Cancels a timer. Returns false if it already fired or was cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.remove(id).is_some()
    }

    /// Removes a timer and hands back its callback.
    fn remove(&mut self, id: TimerId) -> Option<TimerCallback> {
        let callback = self.callbacks.remove(&id.0)?;
        let entries = self.heap.len();
        if entries > PRUNE_THRESHOLD && entries > 2 * self.callbacks.len() {
            let live = &self.callbacks;
            self.heap.retain(|entry| live.contains_key(&entry.generation));
        }
        Some(callback)
    }

    /// Heap entries, stale ones included.
    #[cfg(test)]
    fn entries(&self) -> usize {
        self.heap.len()
    }

    /// Returns the earliest live deadline, discarding stale entries.
    pub(crate) fn peek_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if self.callbacks.contains_key(&entry.generation) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops all timers that have expired (deadline <= now), earliest first.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let generation = entry.generation;
            self.heap.pop();
            if let Some(callback) = self.callbacks.remove(&generation) {
                expired.push(callback);
            }
        }
        expired
    }

    /// Removes every timer, returning the callbacks so they can be dropped
    /// outside any lock.
    pub(crate) fn clear(&mut self) -> Vec<TimerCallback> {
        self.heap.clear();
        self.callbacks.drain().map(|(_, cb)| cb).collect()
    }
}

/// Shared timer state driven by the runtime's timer thread.
pub(crate) struct TimerDriver {
    heap: Mutex<TimerHeap>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

impl TimerDriver {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(TimerHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Registers a callback to run at `deadline`.
    pub(crate) fn register(&self, deadline: Instant, callback: TimerCallback) -> TimerId {
        let id = self.heap.lock().insert(deadline, callback);
        self.wakeup.notify_one();
        id
    }

    pub(crate) fn cancel(&self, id: TimerId) -> bool {
        // Bind first so the callback is dropped after the lock is released.
        let removed = self.heap.lock().remove(id);
        removed.is_some()
    }

    pub(crate) fn pending(&self) -> usize {
        self.heap.lock().len()
    }

    /// Body of the timer thread. Returns after [`TimerDriver::shutdown`].
    pub(crate) fn run(&self) {
        let mut heap = self.heap.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            let expired = heap.pop_expired(Instant::now());
            if !expired.is_empty() {
                MutexGuard::unlocked(&mut heap, || {
                    for callback in expired {
                        callback();
                    }
                });
                continue;
            }
            match heap.peek_deadline() {
                Some(deadline) => {
                    self.wakeup.wait_until(&mut heap, deadline);
                }
                None => self.wakeup.wait(&mut heap),
            }
        }
    }

    /// Stops the driver thread and discards pending timers.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let dropped = self.heap.lock().clear();
        self.wakeup.notify_all();
        drop(dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, n: u32) -> TimerCallback {
        let log = Arc::clone(log);
        Box::new(move || log.lock().push(n))
    }

    #[test]
    fn earliest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        heap.insert(base + Duration::from_millis(100), recorder(&log, 1));
        heap.insert(base + Duration::from_millis(50), recorder(&log, 2));
        heap.insert(base + Duration::from_millis(150), recorder(&log, 3));

        assert_eq!(heap.peek_deadline(), Some(base + Duration::from_millis(50)));
        for cb in heap.pop_expired(base + Duration::from_millis(100)) {
            cb();
        }
        assert_eq!(*log.lock(), vec![2, 1]);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn cancelled_timers_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        let first = heap.insert(base, recorder(&log, 1));
        heap.insert(base + Duration::from_millis(5), recorder(&log, 2));

        assert!(heap.cancel(first));
        assert!(!heap.cancel(first));
        assert_eq!(heap.peek_deadline(), Some(base + Duration::from_millis(5)));
        let expired = heap.pop_expired(base + Duration::from_secs(1));
        assert_eq!(expired.len(), 1);
        assert!(heap.is_empty());
    }

    #[test]
    fn cancelled_timers_do_not_accumulate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let far = Instant::now() + Duration::from_secs(3600);
        let mut heap = TimerHeap::new();
        let keep = heap.insert(far, recorder(&log, 0));
        for n in 1..=1_000 {
            let id = heap.insert(far, recorder(&log, n));
            assert!(heap.cancel(id));
        }
        assert_eq!(heap.len(), 1);
        assert!(
            heap.entries() <= 2 * PRUNE_THRESHOLD,
            "{} stale entries left in the heap",
            heap.entries()
        );
        assert_eq!(heap.peek_deadline(), Some(far));
        assert!(heap.cancel(keep));
        assert!(heap.is_empty());
    }

    #[test]
    fn driver_fires_and_shuts_down() {
        let driver = Arc::new(TimerDriver::new());
        let thread = {
            let driver = Arc::clone(&driver);
            std::thread::spawn(move || driver.run())
        };
        let fired = Arc::new(AtomicUsize::new(0));
        for ms in [5_u64, 1, 10] {
            let fired = Arc::clone(&fired);
            driver.register(
                Instant::now() + Duration::from_millis(ms),
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        let cancelled = driver.register(
            Instant::now() + Duration::from_millis(15),
            Box::new(|| panic!("cancelled timer fired")),
        );
        assert!(driver.cancel(cancelled));

        let start = Instant::now();
        while fired.load(Ordering::SeqCst) < 3 && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        driver.shutdown();
        thread.join().unwrap();
        assert_eq!(driver.pending(), 0);
    }
}
