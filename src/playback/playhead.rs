//! Virtual playhead on the output device clock.

use std::time::Duration;

/// Cursor marking where the next scheduled buffer starts.
///
/// Every reservation starts at `max(position, now + margin)`, so back-to-back
/// buffers touch exactly while the playhead is ahead of the device, and a
/// playhead that fell behind (starvation) jumps forward instead of trying to
/// catch up.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayheadClock {
    position: f64,
    margin: f64,
}

impl PlayheadClock {
    pub fn new(now: f64, margin: Duration) -> Self {
        Self {
            position: now,
            margin: margin.as_secs_f64(),
        }
    }

    /// Time in seconds at which the next buffer would start if still ahead.
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Move the cursor to the device's current time.
    pub fn reset(&mut self, now: f64) {
        self.position = now;
    }

    /// True when the device clock has already passed the cursor.
    pub fn is_behind(&self, now: f64) -> bool {
        self.position < now
    }

    /// Seconds of audio already committed beyond `now`.
    pub fn ahead_of(&self, now: f64) -> f64 {
        (self.position - now).max(0.0)
    }

    /// Reserve `duration` seconds of output and return the start time.
    pub fn reserve(&mut self, now: f64, duration: f64) -> f64 {
        let start = self.position.max(now + self.margin);
        self.position = start + duration;
        start
    }
}
