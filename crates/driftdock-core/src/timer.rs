//! Timed resumptions on the main context.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Deadline-ordered queue of payloads. Equal deadlines fire in submission order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: BTreeMap<(Instant, TimerId), T>,
    next_id: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn schedule_at(&mut self, deadline: Instant, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert((deadline, id), payload);
        id
    }

    pub fn schedule_after(&mut self, now: Instant, delay: Duration, payload: T) -> TimerId {
        self.schedule_at(now + delay, payload)
    }

    /// Returns the payload if the timer was still pending.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let key = self.entries.keys().find(|(_, entry)| *entry == id).copied()?;
        self.entries.remove(&key)
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.entries.keys().any(|(_, entry)| *entry == id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns the earliest payload whose deadline has passed.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        let key = *self.entries.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Restart-on-reschedule wrapper around a single pending timer.
#[derive(Debug, Default)]
pub struct Debouncer {
    pending: Option<TimerId>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<T>(
        &mut self,
        timers: &mut TimerQueue<T>,
        now: Instant,
        delay: Duration,
        payload: T,
    ) {
        self.cancel(timers);
        self.pending = Some(timers.schedule_after(now, delay, payload));
    }

    pub fn cancel<T>(&mut self, timers: &mut TimerQueue<T>) {
        if let Some(id) = self.pending.take() {
            timers.cancel(id);
        }
    }

    /// Call when the debounced timer fires so a later `cancel` is a no-op.
    pub fn fired(&mut self) {
        self.pending = None;
    }

    pub fn is_pending<T>(&self, timers: &TimerQueue<T>) -> bool {
        self.pending.is_some_and(|id| timers.is_pending(id))
    }
}
