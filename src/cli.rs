//! Command-line interface for voxchat
//!
//! Provides argument parsing using clap derive macros.

use crate::config::{Config, HeaderPolicy};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Voice chat with a streaming speech agent from the terminal
#[derive(Parser, Debug)]
#[command(
    name = "voxchat",
    version,
    about = "Voice chat with a streaming speech agent from the terminal"
)]
pub struct Cli {
    /// Subcommand to execute (default: chat)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: session info, -vv: playback diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Backend WebSocket URL (e.g., ws://127.0.0.1:8000/ws/audio)
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,

    /// Microphone device name
    #[arg(long, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Speaker device name
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Stream a WAV file instead of the microphone
    #[arg(long, value_name = "FILE")]
    pub input_file: Option<PathBuf>,

    /// Don't send any audio; only listen to the agent
    #[arg(long, conflicts_with = "input_file")]
    pub listen_only: bool,

    /// Start streaming immediately instead of waiting for audio_stream_ready
    #[arg(long)]
    pub no_wait: bool,

    /// Safety margin before the first buffer of a burst plays. Examples: 50ms, 0.1s
    #[arg(long, short = 'j', value_name = "DURATION", value_parser = parse_duration)]
    pub jitter: Option<Duration>,

    /// Header handling on a stream's first chunk: always, sniff, never
    #[arg(long, value_name = "POLICY")]
    pub header_policy: Option<HeaderPolicy>,

    /// Also print backend status messages
    #[arg(long)]
    pub show_status: bool,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime` (`50ms`, `1s`,
/// `1s 500ms`); a bare number is taken as milliseconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input and output devices
    Devices,

    /// Play a recorded JSON-lines log of server messages offline
    Replay {
        /// Capture file, one server message per line
        file: PathBuf,

        /// Render the playback timeline to this WAV file
        #[arg(long, value_name = "OUT")]
        wav: Option<PathBuf>,
    },

    /// View and create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file, env and flags merged)
    Show,
    /// Print the configuration file location
    Path,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(url) = &self.server {
            config.server.url = url.clone();
        }
        if let Some(device) = &self.input_device {
            config.capture.device = Some(device.clone());
        }
        if let Some(device) = &self.output_device {
            config.playback.device = Some(device.clone());
        }
        if let Some(jitter) = self.jitter {
            config.playback.jitter_margin_ms = jitter.as_millis() as u64;
        }
        if let Some(policy) = self.header_policy {
            config.playback.header_policy = policy;
        }
        config
    }
}
