//! Default configuration constants for voxchat.
//!
//! Shared by the config types, the CLI and the playback/capture code so the
//! same numbers are not repeated in several places.

/// Backend WebSocket endpoint used when nothing else is configured.
pub const SERVER_URL: &str = "ws://127.0.0.1:8000/ws/audio";

/// Microphone capture sample rate in Hz.
///
/// The speech-to-text backends expect 16kHz mono 16-bit PCM.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Samples per captured frame sent over the wire (256ms at 16kHz).
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// Sample rate of the TTS audio the backend streams back.
pub const PLAYBACK_SAMPLE_RATE: u32 = 44100;

/// Delay kept ahead of the device clock when (re)starting playback.
///
/// Absorbs the arrival-time variance between chunks. Front-ends in the wild
/// use anything from 50 to 150ms; 50ms keeps the reply latency low.
pub const JITTER_MARGIN_MS: u64 = 50;

/// Upper bound accepted for the jitter margin.
pub const MAX_JITTER_MARGIN_MS: u64 = 2000;

/// Size of the canonical RIFF/WAVE header that prefixes the first chunk.
pub const WAV_HEADER_LEN: usize = 44;

/// Bytes per 16-bit PCM sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Channel capacity between the capture thread and the session loop.
pub const CAPTURE_CHANNEL_FRAMES: usize = 64;

/// Polling interval of the capture thread when the device has no samples yet.
pub const CAPTURE_POLL_MS: u64 = 10;

/// Microphone frames kept while waiting for `audio_stream_ready` (about 1s).
pub const PENDING_FRAMES: usize = 4;

/// Longest wait for scheduled audio after the server hangs up.
pub const DRAIN_TIMEOUT_SECS: u64 = 30;

/// Slack added on top of the scheduled audio when waiting for it to finish.
pub const DRAIN_GRACE_SECS: f64 = 0.25;
