use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time and blocking pauses.
///
/// Cache expiry, retry back-off and the courtesy delay between ladder pages all
/// go through this trait so they can be driven deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Seconds since the unix epoch, with sub-second precision.
pub fn unix_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Age of a unix timestamp relative to `now`; timestamps in the future count as zero.
pub fn age_secs(now: SystemTime, stamp: f64) -> f64 {
    (unix_secs(now) - stamp).max(0.0)
}
