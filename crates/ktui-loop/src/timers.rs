#![forbid(unsafe_code)]

//! Timer queue kept sorted by deadline.
//!
//! The queue is generic over the callback type so it can be tested without a
//! loop. Dispatch is split into steps (`due`, `take`, `finish`, `settle`)
//! because a callback may add or remove timers on the very queue it lives in:
//! the callback is moved out while it runs and put back afterwards.

use std::time::{Duration, Instant};

/// Identifier of a scheduled timer. Ids are never reused within a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Timer<F> {
    id: TimerId,
    interval: Duration,
    repeats: bool,
    deadline: Instant,
    // `None` while the callback is running.
    callback: Option<F>,
}

#[derive(Debug)]
pub struct TimerQueue<F> {
    timers: Vec<Timer<F>>,
    last_id: u64,
}

impl<F> Default for TimerQueue<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> TimerQueue<F> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timers: Vec::new(),
            last_id: 0,
        }
    }

    /// Schedule `callback` to fire `interval` after `now`.
    pub fn add(&mut self, interval: Duration, repeats: bool, callback: F, now: Instant) -> TimerId {
        self.last_id += 1;
        let id = TimerId(self.last_id);
        self.timers.push(Timer {
            id,
            interval,
            repeats,
            deadline: now + interval,
            callback: Some(callback),
        });
        self.sort();
        id
    }

    /// Cancel a timer. Returns false if the id is unknown or already expired.
    pub fn remove(&mut self, id: TimerId) -> bool {
        match self.timers.iter().position(|t| t.id == id) {
            Some(index) => {
                self.timers.remove(index);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Time until the earliest deadline, floored at zero. `None` when empty.
    #[must_use]
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.timers
            .first()
            .map(|t| t.deadline.saturating_duration_since(now))
    }

    /// Ids of the timers whose deadline has passed, earliest first.
    #[must_use]
    pub fn due(&self, now: Instant) -> Vec<TimerId> {
        self.timers
            .iter()
            .take_while(|t| t.deadline <= now)
            .map(|t| t.id)
            .collect()
    }

    /// Move a timer's callback out so it can run.
    ///
    /// Returns `None` if the timer was removed since [`due`](Self::due) was
    /// called, or if its callback is already running.
    pub fn take(&mut self, id: TimerId) -> Option<F> {
        self.timers
            .iter_mut()
            .find(|t| t.id == id)
            .and_then(|t| t.callback.take())
    }

    /// Put a callback back after it ran.
    ///
    /// A repeating timer is rescheduled one interval after `now`; a one-shot
    /// timer is dropped. If the callback removed its own timer, the callback
    /// is dropped here.
    pub fn finish(&mut self, id: TimerId, callback: F, now: Instant) {
        let Some(index) = self.timers.iter().position(|t| t.id == id) else {
            return;
        };
        let timer = &mut self.timers[index];
        if timer.repeats {
            timer.deadline = now + timer.interval;
            timer.callback = Some(callback);
        } else {
            self.timers.remove(index);
        }
    }

    /// Restore deadline order after a round of `finish` calls.
    pub fn settle(&mut self) {
        self.sort();
    }

    fn sort(&mut self) {
        // Ties fire in creation order.
        self.timers.sort_by_key(|t| (t.deadline, t.id));
    }
}
