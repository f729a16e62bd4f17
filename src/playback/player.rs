//! Streaming playback buffer: decode, queue, schedule against the playhead.
//!
//! The player is owned by exactly one task. Chunk arrival and device
//! completion notifications are both delivered to it as method calls from
//! that task, so the queue and the playhead need no locking.

use crate::config::{HeaderPolicy, PlaybackConfig};
use crate::error::{Result, VoxError};
use crate::playback::chunk::{AudioChunk, DecodedBuffer, decode_chunk};
use crate::playback::device::{BufferId, OutputDevice, ScheduledBuffer};
use crate::playback::playhead::PlayheadClock;
use std::collections::VecDeque;
use std::time::Duration;

/// Settings for one [`StreamPlayer`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// Sample rate of the incoming PCM.
    pub sample_rate: u32,
    pub jitter_margin: Duration,
    pub header_policy: HeaderPolicy,
    /// Stop scheduling once this much audio is committed to the device;
    /// the rest waits in the queue for a completion notification.
    /// `None` schedules everything as soon as it arrives.
    pub max_lookahead: Option<Duration>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

impl From<&PlaybackConfig> for PlayerConfig {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            jitter_margin: config.jitter_margin(),
            header_policy: config.header_policy,
            max_lookahead: config.max_lookahead_ms.map(Duration::from_millis),
        }
    }
}

/// Coarse player state, derived from the queue and in-flight buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing handed to the device is still playing.
    Idle,
    /// At least one scheduled buffer has not reported completion.
    Playing,
    /// The device rejected a buffer; chunks are dropped until `reset()`.
    Failed,
}

/// Counters accumulated over the player's lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStats {
    pub chunks_submitted: u64,
    pub chunks_queued: u64,
    pub chunks_dropped: u64,
    pub buffers_scheduled: u64,
    pub samples_scheduled: u64,
    /// Sum of the durations of every scheduled buffer, in seconds.
    pub scheduled_seconds: f64,
    /// Times the queue ran dry mid-stream and the playhead had to resync.
    pub starvations: u64,
    pub device_failures: u64,
    pub resets: u64,
}

/// Gap-free playback of an arbitrarily paced stream of audio chunks.
pub struct StreamPlayer<D: OutputDevice> {
    device: D,
    config: PlayerConfig,
    queue: VecDeque<DecodedBuffer>,
    playhead: PlayheadClock,
    in_flight: VecDeque<BufferId>,
    next_id: BufferId,
    awaiting_header: bool,
    primed: bool,
    failed: bool,
    stats: PlaybackStats,
}

impl<D: OutputDevice> StreamPlayer<D> {
    pub fn new(device: D, config: PlayerConfig) -> Self {
        let playhead = PlayheadClock::new(device.current_time(), config.jitter_margin);
        Self {
            device,
            config,
            queue: VecDeque::new(),
            playhead,
            in_flight: VecDeque::new(),
            next_id: 1,
            awaiting_header: true,
            primed: false,
            failed: false,
            stats: PlaybackStats::default(),
        }
    }

    /// Decode a chunk and append it to the playback queue.
    ///
    /// The container header is stripped only from the first chunk of a
    /// stream: when `is_first_of_stream` is set or no chunk has been
    /// submitted since the last `reset()`. Malformed or empty chunks are
    /// logged and dropped. Returns whether the chunk was queued.
    pub fn submit_chunk(&mut self, encoded: &str, is_first_of_stream: bool) -> bool {
        self.stats.chunks_submitted += 1;
        let first = is_first_of_stream || self.awaiting_header;
        self.awaiting_header = false;

        if self.failed {
            tracing::debug!("playback failed for this stream, dropping chunk");
            self.stats.chunks_dropped += 1;
            return false;
        }

        match decode_chunk(encoded, first, self.config.header_policy) {
            Ok(samples) => {
                tracing::trace!(
                    samples = samples.len(),
                    first_of_stream = first,
                    queued = self.queue.len() + 1,
                    "audio chunk queued"
                );
                self.queue.push_back(DecodedBuffer {
                    samples,
                    sample_rate: self.config.sample_rate,
                });
                self.stats.chunks_queued += 1;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, first_of_stream = first, "dropping audio chunk");
                self.stats.chunks_dropped += 1;
                false
            }
        }
    }

    /// Submit a chunk and schedule whatever the queue holds.
    pub fn push_chunk(&mut self, chunk: &AudioChunk, is_first_of_stream: bool) -> Result<usize> {
        if self.submit_chunk(&chunk.data, is_first_of_stream) {
            self.drain_queue()
        } else {
            Ok(0)
        }
    }

    /// Schedule queued buffers back to back on the device.
    ///
    /// Each buffer starts at `max(playhead, now + jitter_margin)` and the
    /// playhead advances by its duration. With a lookahead limit, draining
    /// pauses once that much audio is committed and resumes from
    /// [`on_buffer_complete`](Self::on_buffer_complete).
    ///
    /// # Errors
    /// Returns `VoxError::PlaybackFailed` when the device rejects a buffer.
    /// The remaining queue is discarded and later chunks are dropped until
    /// the next `reset()`.
    pub fn drain_queue(&mut self) -> Result<usize> {
        let mut scheduled = 0;

        while !self.queue.is_empty() {
            let now = self.device.current_time();
            if self.lookahead_reached(now) {
                tracing::trace!(
                    queued = self.queue.len(),
                    ahead = self.playhead.ahead_of(now),
                    "lookahead reached, waiting for completion"
                );
                break;
            }
            let Some(buffer) = self.queue.pop_front() else {
                break;
            };

            if self.primed && self.playhead.is_behind(now) {
                self.stats.starvations += 1;
                tracing::debug!(
                    behind = now - self.playhead.position(),
                    "playback starved, resynchronising playhead"
                );
            }

            let duration = buffer.duration();
            let sample_count = buffer.len() as u64;
            let start_at = self.playhead.reserve(now, duration);
            let id = self.next_id;
            self.next_id += 1;

            let scheduled_buffer = ScheduledBuffer {
                id,
                start_at,
                sample_rate: buffer.sample_rate,
                samples: buffer.samples.into(),
            };

            if let Err(e) = self.device.schedule(scheduled_buffer) {
                return Err(self.fail(e));
            }

            tracing::trace!(id, start_at, duration, "buffer scheduled");
            self.in_flight.push_back(id);
            self.primed = true;
            self.stats.buffers_scheduled += 1;
            self.stats.samples_scheduled += sample_count;
            self.stats.scheduled_seconds += duration;
            scheduled += 1;
        }

        Ok(scheduled)
    }

    /// Device notification that buffer `id` finished playing.
    pub fn on_buffer_complete(&mut self, id: BufferId) -> Result<usize> {
        match self.in_flight.iter().position(|&x| x == id) {
            Some(pos) => {
                self.in_flight.remove(pos);
            }
            None => tracing::trace!(id, "completion for unknown buffer"),
        }

        if !self.queue.is_empty() {
            return self.drain_queue();
        }
        if self.in_flight.is_empty() {
            tracing::debug!("playback idle");
        }
        Ok(0)
    }

    /// Start over for a new response stream.
    ///
    /// Drops every buffer not yet handed to the device, moves the playhead to
    /// the device clock and expects a header on the next chunk. Buffers the
    /// device already accepted still play out.
    pub fn reset(&mut self) {
        let discarded = self.queue.len();
        self.queue.clear();
        self.playhead.reset(self.device.current_time());
        self.awaiting_header = true;
        self.primed = false;
        self.failed = false;
        self.stats.resets += 1;
        tracing::debug!(discarded, "playback reset");
    }

    pub fn state(&self) -> PlaybackState {
        if self.failed {
            PlaybackState::Failed
        } else if self.in_flight.is_empty() {
            PlaybackState::Idle
        } else {
            PlaybackState::Playing
        }
    }

    /// Number of decoded buffers waiting to be scheduled.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of scheduled buffers that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn playhead(&self) -> &PlayheadClock {
        &self.playhead
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    fn lookahead_reached(&self, now: f64) -> bool {
        match self.config.max_lookahead {
            Some(limit) => {
                !self.in_flight.is_empty()
                    && self.playhead.ahead_of(now) >= limit.as_secs_f64()
            }
            None => false,
        }
    }

    fn fail(&mut self, cause: VoxError) -> VoxError {
        let discarded = self.queue.len() as u64 + 1;
        self.queue.clear();
        self.failed = true;
        self.stats.device_failures += 1;
        self.stats.chunks_dropped += discarded;
        tracing::error!(
            device = self.device.name(),
            error = %cause,
            discarded,
            "output device rejected buffer, stopping playback for this stream"
        );
        VoxError::PlaybackFailed {
            message: cause.to_string(),
        }
    }
}
