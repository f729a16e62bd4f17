//! Response stream boundaries.
//!
//! The server never says "this chunk belongs to a new answer" directly. A new
//! stream is inferred from an explicit start message, from the first chunk
//! after a chunk flagged final, from a chunk numbered 1, or from a chunk
//! number that restarts.

use crate::playback::chunk::AudioChunk;

/// Counters for the stream currently playing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCounters {
    pub chunks: u64,
    /// Sum of the sizes the server reported for each chunk.
    pub bytes: u64,
}

/// What the tracker decided about an incoming chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPosition {
    /// First chunk of a new stream; the player must be reset.
    StartsStream,
    /// Continues the current stream.
    Continues,
}

impl ChunkPosition {
    pub fn is_first(self) -> bool {
        matches!(self, Self::StartsStream)
    }
}

#[derive(Debug, Default)]
pub struct StreamTracker {
    /// Set by an explicit start message or a final chunk.
    boundary_pending: bool,
    last_sequence: Option<u64>,
    streams: u64,
    current: StreamCounters,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self {
            boundary_pending: true,
            ..Self::default()
        }
    }

    /// Record an explicit start-of-response message.
    ///
    /// Returns true when this opens a stream, false when a start was
    /// already pending (duplicate `llm_streaming_start`/`tts_streaming_start`).
    pub fn begin(&mut self) -> bool {
        if self.boundary_pending && self.current.chunks == 0 && self.streams > 0 {
            return false;
        }
        self.open_stream();
        true
    }

    /// Classify a chunk and update the counters.
    pub fn observe(&mut self, chunk: &AudioChunk) -> ChunkPosition {
        let restarted = match (self.last_sequence, chunk.sequence) {
            (Some(last), Some(seq)) => seq <= last,
            // Numbering starts partway through a stream of unnumbered chunks
            (None, Some(1)) => self.current.chunks > 0,
            _ => false,
        };

        let position = if self.boundary_pending && self.current.chunks == 0 {
            if self.streams == 0 {
                self.streams = 1;
            }
            self.boundary_pending = false;
            ChunkPosition::StartsStream
        } else if self.boundary_pending || restarted {
            if restarted {
                tracing::debug!(
                    last = self.last_sequence,
                    sequence = chunk.sequence,
                    "chunk numbering restarted, treating as new stream"
                );
            }
            self.open_stream();
            self.boundary_pending = false;
            ChunkPosition::StartsStream
        } else {
            ChunkPosition::Continues
        };

        self.current.chunks += 1;
        self.current.bytes += chunk.byte_size as u64;
        if chunk.sequence.is_some() {
            self.last_sequence = chunk.sequence;
        }
        if chunk.is_final {
            tracing::debug!(
                chunks = self.current.chunks,
                bytes = self.current.bytes,
                "final audio chunk received"
            );
            self.boundary_pending = true;
        }
        position
    }

    /// Number of streams seen so far.
    pub fn streams(&self) -> u64 {
        self.streams
    }

    pub fn current(&self) -> &StreamCounters {
        &self.current
    }

    fn open_stream(&mut self) {
        self.streams += 1;
        self.current = StreamCounters::default();
        self.last_sequence = None;
        self.boundary_pending = true;
    }
}
