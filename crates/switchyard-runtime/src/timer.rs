//! Deadline queue driven by the messenger run loop.
//!
//! The loop asks for the next deadline, sleeps until it passes, then calls
//! [`run_due`]. Scheduling from another thread nudges the loop through the
//! wake-up notifier so a nearer deadline takes effect immediately.
//! Callbacks execute on the loop thread, outside the timer lock, so they
//! may schedule and cancel timers themselves.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type TimerCallback = Box<dyn FnMut() + Send>;

struct TimerEntry {
    deadline: Instant,
    id: u64,
    /// Re-arm period for periodic timers, `None` for one-shots.
    interval: Option<Duration>,
    callback: TimerCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so the binary heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
    }
}

struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    /// IDs cancelled while still sitting in the heap.
    cancelled: HashSet<u64>,
    next_id: u64,
    wakeup: Arc<Notify>,
}

static TIMERS: Mutex<Option<TimerQueue>> = Mutex::new(None);

pub(crate) fn init() {
    let mut guard = TIMERS.lock();
    if guard.is_none() {
        *guard = Some(TimerQueue {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 0,
            wakeup: Arc::new(Notify::new()),
        });
    }
}

pub(crate) fn finalize() {
    *TIMERS.lock() = None;
}

/// Run `callback` once, `after` from now.
///
/// Returns `None` when the timer subsystem is not initialised.
pub fn add_timer_event_callback(
    after: Duration,
    callback: impl FnMut() + Send + 'static,
) -> Option<TimerId> {
    schedule(after, None, Box::new(callback))
}

/// Run `callback` every `interval`, starting one interval from now.
///
/// Returns `None` when the timer subsystem is not initialised.
pub fn add_periodic_event_callback(
    interval: Duration,
    callback: impl FnMut() + Send + 'static,
) -> Option<TimerId> {
    schedule(interval, Some(interval), Box::new(callback))
}

fn schedule(after: Duration, interval: Option<Duration>, callback: TimerCallback) -> Option<TimerId> {
    let mut guard = TIMERS.lock();
    let queue = guard.as_mut()?;
    let id = queue.next_id;
    queue.next_id += 1;
    queue.heap.push(TimerEntry { deadline: Instant::now() + after, id, interval, callback });
    queue.wakeup.notify_one();
    Some(TimerId(id))
}

/// Cancel a scheduled timer.
///
/// Returns true when a pending timer with this ID existed.
pub fn delete_timer_event_callback(id: TimerId) -> bool {
    let mut guard = TIMERS.lock();
    let Some(queue) = guard.as_mut() else { return false };
    let pending = !queue.cancelled.contains(&id.0)
        && queue.heap.iter().any(|entry| entry.id == id.0);
    if pending {
        queue.cancelled.insert(id.0);
        queue.wakeup.notify_one();
    }
    pending
}

/// Earliest pending deadline, if any.
pub(crate) fn next_deadline() -> Option<Instant> {
    TIMERS.lock().as_ref().and_then(|queue| queue.heap.peek().map(|entry| entry.deadline))
}

/// Notifier pulsed whenever the schedule changes.
pub(crate) fn wakeup_notify() -> Option<Arc<Notify>> {
    TIMERS.lock().as_ref().map(|queue| Arc::clone(&queue.wakeup))
}

/// Fire every timer whose deadline has passed, re-arming periodic ones.
pub(crate) fn run_due() {
    let now = Instant::now();
    let mut due = Vec::new();
    {
        let mut guard = TIMERS.lock();
        let Some(queue) = guard.as_mut() else { return };
        loop {
            let ready = queue.heap.peek().is_some_and(|entry| entry.deadline <= now);
            if !ready {
                break;
            }
            if let Some(entry) = queue.heap.pop() {
                if queue.cancelled.remove(&entry.id) {
                    continue;
                }
                due.push(entry);
            }
        }
    }

    for mut entry in due {
        (entry.callback)();
        if let Some(interval) = entry.interval {
            let mut guard = TIMERS.lock();
            if let Some(queue) = guard.as_mut() {
                // The callback itself may have cancelled the timer.
                if queue.cancelled.remove(&entry.id) {
                    continue;
                }
                entry.deadline = now + interval;
                queue.heap.push(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use super::*;
    use crate::test_support::SERIAL;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let bump = Arc::clone(&count);
        (count, move || {
            bump.fetch_add(1, AtomicOrdering::SeqCst);
        })
    }

    #[test]
    fn scheduling_requires_an_initialised_queue() {
        let _guard = SERIAL.lock();
        finalize();

        let (_, callback) = counter();
        assert!(add_timer_event_callback(Duration::ZERO, callback).is_none());
    }

    #[test]
    fn one_shot_timers_fire_once_when_due() {
        let _guard = SERIAL.lock();
        init();

        let (count, callback) = counter();
        add_timer_event_callback(Duration::ZERO, callback);
        run_due();
        run_due();

        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
        assert!(next_deadline().is_none());

        finalize();
    }

    #[test]
    fn future_timers_do_not_fire_early() {
        let _guard = SERIAL.lock();
        init();

        let (count, callback) = counter();
        add_timer_event_callback(Duration::from_secs(3600), callback);
        run_due();

        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
        assert!(next_deadline().is_some());

        finalize();
    }

    #[test]
    fn periodic_timers_re_arm_after_firing() {
        let _guard = SERIAL.lock();
        init();

        let (count, callback) = counter();
        add_periodic_event_callback(Duration::ZERO, callback);
        run_due();
        run_due();

        assert!(count.load(AtomicOrdering::SeqCst) >= 2);

        finalize();
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let _guard = SERIAL.lock();
        init();

        let (count, callback) = counter();
        let id = add_timer_event_callback(Duration::ZERO, callback);
        let id = id.unwrap();
        assert!(delete_timer_event_callback(id));
        assert!(!delete_timer_event_callback(id));
        run_due();

        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);

        finalize();
    }
}
