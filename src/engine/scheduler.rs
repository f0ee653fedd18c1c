//! Delayed task queue for stage ticks
//!
//! Time is virtual: the queue only moves forward when the engine advances
//! it, either from tests or from the runtime driver mapping wall-clock time
//! onto it. Each match key holds at most one timer.

use crate::types::{MatchKey, Stage};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// A scheduled stage tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub key: MatchKey,
    /// Stage the tick was scheduled for; a mismatch makes it stale
    pub stage: Stage,
    pub due: Duration,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    now: Duration,
    next_id: u64,
    queue: BTreeMap<(Duration, u64), Timer>,
    by_key: HashMap<MatchKey, (Duration, u64)>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Schedule a tick after `delay`, replacing any timer for the same key
    pub fn schedule(&mut self, key: MatchKey, stage: Stage, delay: Duration) {
        self.cancel(key);
        let due = self.now + delay;
        let id = self.next_id;
        self.next_id += 1;
        self.queue.insert((due, id), Timer { key, stage, due });
        self.by_key.insert(key, (due, id));
    }

    /// Cancel the timer for a key; returns whether one was pending
    pub fn cancel(&mut self, key: MatchKey) -> bool {
        match self.by_key.remove(&key) {
            Some(slot) => self.queue.remove(&slot).is_some(),
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: MatchKey) -> bool {
        self.by_key.contains_key(&key)
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its due time
    pub fn pop_due(&mut self, until: Duration) -> Option<Timer> {
        let (&slot, _) = self.queue.iter().next()?;
        if slot.0 > until {
            return None;
        }
        let timer = self.queue.remove(&slot)?;
        self.by_key.remove(&timer.key);
        if timer.due > self.now {
            self.now = timer.due;
        }
        Some(timer)
    }

    /// Move the clock forward without firing anything
    pub fn advance_clock(&mut self, to: Duration) {
        if to > self.now {
            self.now = to;
        }
    }

    /// Due time of the earliest timer
    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.keys().next().map(|(due, _)| *due)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_fires_in_due_order() {
        let mut timers = TimerQueue::new();
        let a = MatchKey::new(1, 1);
        let b = MatchKey::new(1, 2);
        timers.schedule(a, Stage::MapVote, SECOND * 5);
        timers.schedule(b, Stage::ReadinessCheck, SECOND * 2);

        assert!(timers.pop_due(SECOND).is_none());
        assert_eq!(timers.pop_due(SECOND * 10).map(|t| t.key), Some(b));
        assert_eq!(timers.now(), SECOND * 2);
        assert_eq!(timers.pop_due(SECOND * 10).map(|t| t.key), Some(a));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_reschedule_replaces_timer() {
        let mut timers = TimerQueue::new();
        let key = MatchKey::new(1, 1);
        timers.schedule(key, Stage::ReadinessCheck, SECOND);
        timers.schedule(key, Stage::TeamFormation, SECOND * 3);

        assert_eq!(timers.len(), 1);
        let timer = timers.pop_due(SECOND * 3).unwrap();
        assert_eq!(timer.stage, Stage::TeamFormation);
    }

    #[test]
    fn test_cancel() {
        let mut timers = TimerQueue::new();
        let key = MatchKey::new(1, 1);
        timers.schedule(key, Stage::MapVote, SECOND);
        assert!(timers.cancel(key));
        assert!(!timers.cancel(key));
        assert!(!timers.is_scheduled(key));
        assert!(timers.pop_due(SECOND * 2).is_none());
    }

    #[test]
    fn test_schedule_relative_to_clock() {
        let mut timers = TimerQueue::new();
        timers.advance_clock(SECOND * 10);
        timers.schedule(MatchKey::new(1, 1), Stage::MapVote, SECOND);
        assert_eq!(timers.next_deadline(), Some(SECOND * 11));
    }
}
