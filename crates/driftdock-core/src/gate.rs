//! Paces heavyweight player construction.
//!
//! Many surfaces finishing their probes in the same instant would each build a
//! decoder right away. The gate hands out dispatch slots on a virtual time
//! cursor instead: every reservation lands at least `spacing` after the
//! previous one, in submission order, and never fails.

use std::time::{Duration, Instant};

use crate::timer::{TimerId, TimerQueue};

#[derive(Debug)]
pub struct LoadGate {
    spacing: Duration,
    cursor: Option<Instant>,
}

impl LoadGate {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            cursor: None,
        }
    }

    /// Reserves the next free slot at or after `now`.
    pub fn reserve(&mut self, now: Instant) -> Instant {
        let slot = match self.cursor {
            Some(previous) => (previous + self.spacing).max(now),
            None => now,
        };
        self.cursor = Some(slot);
        slot
    }

    /// Reserves a slot and queues `work` to run on the main context at it.
    pub fn schedule_on_main<T>(
        &mut self,
        timers: &mut TimerQueue<T>,
        now: Instant,
        work: T,
    ) -> (Instant, TimerId) {
        let slot = self.reserve(now);
        (slot, timers.schedule_at(slot, work))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACING: Duration = Duration::from_millis(180);

    #[test]
    fn burst_is_spread_by_spacing() {
        let start = Instant::now();
        let mut gate = LoadGate::new(SPACING);
        let slots: Vec<Instant> = (0..5).map(|_| gate.reserve(start)).collect();

        assert_eq!(slots[0], start);
        for pair in slots.windows(2) {
            assert!(pair[1] >= pair[0] + SPACING);
        }
    }

    #[test]
    fn idle_gate_dispatches_immediately() {
        let start = Instant::now();
        let mut gate = LoadGate::new(SPACING);
        gate.reserve(start);

        let later = start + Duration::from_secs(2);
        assert_eq!(gate.reserve(later), later);
    }

    #[test]
    fn late_submission_still_respects_previous_slot() {
        let start = Instant::now();
        let mut gate = LoadGate::new(SPACING);
        gate.reserve(start);
        gate.reserve(start);

        let slot = gate.reserve(start + Duration::from_millis(200));
        assert_eq!(slot, start + SPACING * 2);
    }

    #[test]
    fn scheduled_work_fires_in_order() {
        let start = Instant::now();
        let mut gate = LoadGate::new(SPACING);
        let mut timers = TimerQueue::new();
        for index in 0..3 {
            gate.schedule_on_main(&mut timers, start, index);
        }

        assert_eq!(timers.pop_due(start), Some(0));
        assert_eq!(timers.pop_due(start + SPACING - Duration::from_millis(1)), None);
        assert_eq!(timers.pop_due(start + SPACING), Some(1));
        assert_eq!(timers.pop_due(start + SPACING * 2), Some(2));
    }
}
