//! Audio output devices the playback buffer schedules against.
//!
//! A device exposes a monotonic clock (seconds since it was opened), accepts
//! buffers to start at an absolute clock time, and reports each finished
//! buffer through a completion channel.

use crate::error::{Result, VoxError};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Identifies one scheduled buffer in completion notifications.
pub type BufferId = u64;

/// Sender half used by devices to report finished buffers.
pub type CompletionSender = UnboundedSender<BufferId>;

/// A buffer handed to the device with its absolute start time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    /// Device clock time in seconds at which the first sample plays.
    pub start_at: f64,
    pub sample_rate: u32,
    pub samples: Arc<[f32]>,
}

impl ScheduledBuffer {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration()
    }
}

/// Output primitive the playback buffer drives.
///
/// This trait allows swapping implementations (sound card, WAV file, mock).
pub trait OutputDevice: Send {
    /// Current device clock in seconds.
    fn current_time(&self) -> f64;

    /// Queue `buffer` to start at `buffer.start_at`.
    ///
    /// Once accepted a buffer cannot be withdrawn; it plays to completion and
    /// its id is reported on the completion channel.
    fn schedule(&mut self, buffer: ScheduledBuffer) -> Result<()>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "output"
    }
}

impl<D: OutputDevice + ?Sized> OutputDevice for Box<D> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn schedule(&mut self, buffer: ScheduledBuffer) -> Result<()> {
        (**self).schedule(buffer)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Device whose clock is advanced by the caller instead of by hardware.
///
/// Used for offline replay and for tests.
pub trait VirtualOutput: OutputDevice {
    /// Move the clock forward to `time` (never backwards) and report the
    /// buffers that finished on the way.
    fn advance_to(&mut self, time: f64) -> Vec<BufferId>;

    /// Move the clock past every scheduled buffer and report them finished.
    fn finish(&mut self) -> Result<Vec<BufferId>>;
}

/// Buffers scheduled on a virtual clock, in scheduling order.
#[derive(Debug, Default, Clone)]
pub(crate) struct VirtualTimeline {
    now: f64,
    pending: Vec<ScheduledBuffer>,
}

impl VirtualTimeline {
    pub(crate) fn now(&self) -> f64 {
        self.now
    }

    pub(crate) fn push(&mut self, buffer: ScheduledBuffer) {
        self.pending.push(buffer);
    }

    pub(crate) fn advance_to(&mut self, time: f64) -> Vec<BufferId> {
        if time > self.now {
            self.now = time;
        }
        let now = self.now;
        let mut finished = Vec::new();
        self.pending.retain(|b| {
            if b.end_at() <= now {
                finished.push(b.id);
                false
            } else {
                true
            }
        });
        finished
    }

    pub(crate) fn latest_end(&self) -> f64 {
        self.pending
            .iter()
            .map(ScheduledBuffer::end_at)
            .fold(self.now, f64::max)
    }
}

/// Mock output device for testing
#[derive(Debug, Default)]
pub struct MockOutputDevice {
    timeline: VirtualTimeline,
    scheduled: Vec<ScheduledBuffer>,
    should_fail_schedule: bool,
    fail_after: Option<usize>,
    error_message: String,
    completions: Option<CompletionSender>,
}

impl MockOutputDevice {
    /// Create a new mock device with its clock at zero
    pub fn new() -> Self {
        Self {
            error_message: "mock device unavailable".to_string(),
            ..Self::default()
        }
    }

    /// Configure the mock to reject every schedule call
    pub fn with_schedule_failure(mut self) -> Self {
        self.should_fail_schedule = true;
        self
    }

    /// Configure the mock to accept `count` buffers and reject the rest
    pub fn with_failure_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Also report finished buffers on a channel
    pub fn with_completion_sender(mut self, tx: CompletionSender) -> Self {
        self.completions = Some(tx);
        self
    }

    /// Every buffer accepted so far, in scheduling order
    pub fn scheduled(&self) -> &[ScheduledBuffer] {
        &self.scheduled
    }

    /// Set the clock without reporting completions
    pub fn set_time(&mut self, time: f64) {
        self.timeline.now = time;
    }

    fn notify(&self, finished: &[BufferId]) {
        if let Some(tx) = &self.completions {
            for &id in finished {
                // Receiver gone means the session ended; nothing left to tell.
                if tx.send(id).is_err() {
                    break;
                }
            }
        }
    }
}

impl OutputDevice for MockOutputDevice {
    fn current_time(&self) -> f64 {
        self.timeline.now()
    }

    fn schedule(&mut self, buffer: ScheduledBuffer) -> Result<()> {
        let over_limit = self
            .fail_after
            .is_some_and(|limit| self.scheduled.len() >= limit);
        if self.should_fail_schedule || over_limit {
            return Err(VoxError::OutputDevice {
                message: self.error_message.clone(),
            });
        }
        self.scheduled.push(buffer.clone());
        self.timeline.push(buffer);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl VirtualOutput for MockOutputDevice {
    fn advance_to(&mut self, time: f64) -> Vec<BufferId> {
        let finished = self.timeline.advance_to(time);
        self.notify(&finished);
        finished
    }

    fn finish(&mut self) -> Result<Vec<BufferId>> {
        let end = self.timeline.latest_end();
        Ok(self.advance_to(end))
    }
}
