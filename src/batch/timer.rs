use chrono::{DateTime, TimeDelta, Utc};

/// A cancellable one-shot deadline.
///
/// The batcher owns one of these instead of spawning a timer task: the host
/// event loop calls [`EventBatcher::poll`](crate::EventBatcher::poll), which
/// fires the flush once [`is_due`](Self::is_due) turns true.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTimer {
    deadline: Option<DateTime<Utc>>,
}

impl DebounceTimer {
    /// Creates a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer to fire `delay` after `now`, replacing any deadline.
    pub fn arm(&mut self, now: DateTime<Utc>, delay: TimeDelta) {
        self.deadline = Some(now + delay);
    }

    /// Arms the timer only if it is not already armed.
    ///
    /// Returns `true` if the timer was armed by this call.
    pub fn arm_if_idle(&mut self, now: DateTime<Utc>, delay: TimeDelta) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.arm(now, delay);
        true
    }

    /// Disarms the timer.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Returns `true` if a deadline is set.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns the current deadline.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Returns `true` once `now` has reached the deadline.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}
