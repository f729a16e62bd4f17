//! voxchat - terminal voice chat with a streaming speech agent
//!
//! Streams microphone audio to a voice-agent backend over WebSocket and plays
//! the spoken reply gap-free as its chunks arrive.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod playback;
pub mod protocol;
pub mod replay;
pub mod session;
pub mod sink;

// L4 composition root - needs the terminal sink
#[cfg(feature = "cli")]
pub mod app;

// Core traits (source → session → sink, player → device)
pub use audio::recorder::AudioSource;
pub use playback::{OutputDevice, VirtualOutput};
pub use session::MessageChannel;
pub use sink::{CollectorSink, TranscriptSink};

// Playback
pub use playback::{AudioChunk, PlaybackStats, PlayerConfig, StreamPlayer, StreamTracker};

// Session
pub use session::{EventRouter, Session, SessionConfig, SessionSummary};

// Error handling
pub use error::{DecodeError, Result, VoxError};

// Config
pub use config::{Config, HeaderPolicy};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
