//! Error types for voxchat.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Chunk decoding errors (non-fatal, the chunk is dropped)
    #[error("Audio chunk decode failed: {0}")]
    Decode(#[from] DecodeError),

    // Output device errors
    #[error("Audio output device not found: {device}")]
    OutputDeviceNotFound { device: String },

    #[error("Audio output device error: {message}")]
    OutputDevice { message: String },

    #[error("Playback failed: {message}")]
    PlaybackFailed { message: String },

    // Audio capture errors
    #[error("Audio input device not found: {device}")]
    InputDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Message channel errors
    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("Message channel error: {message}")]
    Channel { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

/// Why an encoded chunk could not be turned into samples.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("chunk payload is empty")]
    Empty,

    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("no sample data after stripping {header_len}-byte header ({len} bytes total)")]
    HeaderOnly { header_len: usize, len: usize },

    #[error("{len} bytes is not a whole number of {bytes_per_sample}-byte samples")]
    Truncated { len: usize, bytes_per_sample: usize },
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxError>;
