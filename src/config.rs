use crate::defaults;
use crate::error::{Result, VoxError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
}

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
}

/// Microphone capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_samples: usize,
}

/// Streaming playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub jitter_margin_ms: u64,
    pub header_policy: HeaderPolicy,
    /// Cap on audio committed ahead of the device clock; unset means no cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lookahead_ms: Option<u64>,
}

/// How the container header on the first chunk of a stream is handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeaderPolicy {
    /// Always drop the first 44 bytes of a stream's first chunk.
    Always,
    /// Drop them only when the chunk starts with a `RIFF` tag.
    #[default]
    Sniff,
    /// Treat every chunk as raw PCM.
    Never,
}

impl std::str::FromStr for HeaderPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "sniff" => Ok(Self::Sniff),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown header policy '{}' (expected always, sniff or never)",
                other
            )),
        }
    }
}

impl std::fmt::Display for HeaderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Always => "always",
            Self::Sniff => "sniff",
            Self::Never => "never",
        };
        f.write_str(name)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: defaults::SERVER_URL.to_string(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::CAPTURE_SAMPLE_RATE,
            frame_samples: defaults::CAPTURE_FRAME_SAMPLES,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            jitter_margin_ms: defaults::JITTER_MARGIN_MS,
            header_policy: HeaderPolicy::default(),
            max_lookahead_ms: None,
        }
    }
}

impl PlaybackConfig {
    /// Jitter margin as a duration.
    pub fn jitter_margin(&self) -> Duration {
        Duration::from_millis(self.jitter_margin_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXCHAT_SERVER_URL → server.url
    /// - VOXCHAT_INPUT_DEVICE → capture.device
    /// - VOXCHAT_OUTPUT_DEVICE → playback.device
    /// - VOXCHAT_JITTER_MS → playback.jitter_margin_ms (ignored unless numeric)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("VOXCHAT_SERVER_URL")
            && !url.is_empty()
        {
            self.server.url = url;
        }

        if let Ok(device) = std::env::var("VOXCHAT_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.capture.device = Some(device);
        }

        if let Ok(device) = std::env::var("VOXCHAT_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.playback.device = Some(device);
        }

        if let Ok(jitter) = std::env::var("VOXCHAT_JITTER_MS")
            && let Ok(ms) = jitter.trim().parse::<u64>()
        {
            self.playback.jitter_margin_ms = ms;
        }

        self
    }

    /// Check values that deserialize fine but cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if !(self.server.url.starts_with("ws://") || self.server.url.starts_with("wss://")) {
            return Err(VoxError::ConfigInvalidValue {
                key: "server.url".to_string(),
                message: format!("expected a ws:// or wss:// URL, got '{}'", self.server.url),
            });
        }
        if self.capture.sample_rate == 0 {
            return Err(VoxError::ConfigInvalidValue {
                key: "capture.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.capture.frame_samples == 0 {
            return Err(VoxError::ConfigInvalidValue {
                key: "capture.frame_samples".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.playback.sample_rate == 0 {
            return Err(VoxError::ConfigInvalidValue {
                key: "playback.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.playback.jitter_margin_ms > defaults::MAX_JITTER_MARGIN_MS {
            return Err(VoxError::ConfigInvalidValue {
                key: "playback.jitter_margin_ms".to_string(),
                message: format!(
                    "{}ms exceeds the {}ms maximum",
                    self.playback.jitter_margin_ms,
                    defaults::MAX_JITTER_MARGIN_MS
                ),
            });
        }
        if self.playback.max_lookahead_ms == Some(0) {
            return Err(VoxError::ConfigInvalidValue {
                key: "playback.max_lookahead_ms".to_string(),
                message: "must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    /// Serialize to TOML, as written by `voxchat config init`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VoxError::Other(e.to_string()))
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxchat/config.toml on Linux, or a relative
    /// `voxchat/config.toml` when no config directory can be determined.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxchat")
            .join("config.toml")
    }
}
