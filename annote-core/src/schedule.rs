//! Clocks and explicit timers.
//!
//! Timers do not run on their own: the owner calls `due`/`fire` from its
//! polling loop with the current clock reading. Tests drive a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time since construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-advanced clock for tests and replays; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Periodic task with an explicit start/stop lifecycle.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    interval_ms: u64,
    next_due: Option<u64>,
}

impl ScheduledTask {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            next_due: None,
        }
    }

    /// Start (or restart) the task; the first tick is one interval away.
    pub fn start(&mut self, now_ms: u64) {
        self.next_due = Some(now_ms + self.interval_ms);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// Force the next `due` check to succeed.
    pub fn trigger_now(&mut self, now_ms: u64) {
        if self.next_due.is_some() {
            self.next_due = Some(now_ms);
        }
    }

    /// True once per elapsed interval while running. Missed ticks collapse.
    pub fn due(&mut self, now_ms: u64) -> bool {
        match self.next_due {
            Some(at) if now_ms >= at => {
                self.next_due = Some(now_ms + self.interval_ms);
                true
            }
            _ => false,
        }
    }
}

/// Fires once after a quiet period; every `touch` restarts the wait.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay_ms: u64,
    deadline: Option<u64>,
}

impl Debounce {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            deadline: None,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.deadline = Some(now_ms + self.delay_ms);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True exactly once when the quiet period has elapsed.
    pub fn fire(&mut self, now_ms: u64) -> bool {
        match self.deadline {
            Some(at) if now_ms >= at => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(250);
        assert_eq!(other.now_ms(), 250);
        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_scheduled_task_lifecycle() {
        let mut task = ScheduledTask::new(200);
        assert!(!task.due(1_000));

        task.start(0);
        assert!(!task.due(199));
        assert!(task.due(200));
        assert!(!task.due(300));
        // missed ticks collapse into one
        assert!(task.due(1_000));
        assert!(!task.due(1_100));

        task.trigger_now(1_100);
        assert!(task.due(1_100));

        task.stop();
        assert!(!task.is_running());
        assert!(!task.due(10_000));
    }

    #[test]
    fn test_debounce_restarts_on_touch() {
        let mut debounce = Debounce::new(160);
        debounce.touch(0);
        debounce.touch(100);
        assert!(!debounce.fire(200));
        assert!(debounce.fire(260));
        assert!(!debounce.fire(400));

        debounce.touch(500);
        debounce.cancel();
        assert!(!debounce.fire(1_000));
    }
}
