//! Application entry points behind the CLI.
//!
//! Wires configuration, devices, the backend connection and the terminal
//! sink together:
//! microphone → backend → transcript + spoken reply

use crate::config::Config;
use crate::error::Result;
use crate::playback::{MockOutputDevice, PlayerConfig, StreamPlayer, VirtualOutput, WavFileOutput};
use crate::replay::replay_file;
use crate::session::{EventRouter, SessionSummary};
use crate::sink::StdoutSink;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

#[cfg(feature = "cpal-audio")]
use crate::{
    audio::capture::CpalAudioSource,
    audio::frames::{CaptureFrame, CaptureHandle, FrameCaptureConfig, spawn_frame_capture},
    audio::recorder::AudioSource,
    audio::wav::WavAudioSource,
    playback::CpalOutput,
    session::{Session, SessionConfig, WebSocketChannel},
};

/// What to feed the backend during a chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AudioInput {
    /// Live microphone (`capture.device`).
    #[default]
    Microphone,
    /// A WAV file streamed at speaking pace.
    File(PathBuf),
    /// Nothing; the session only listens.
    None,
}

/// Options for [`run_chat`] that don't live in the config file.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub input: AudioInput,
    pub wait_for_ready: bool,
    pub show_status: bool,
    pub quiet: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            input: AudioInput::Microphone,
            wait_for_ready: true,
            show_status: false,
            quiet: false,
        }
    }
}

fn terminal_sink(quiet: bool, show_status: bool) -> StdoutSink {
    if quiet {
        return StdoutSink::with_writer(Box::new(std::io::sink()));
    }
    StdoutSink::new()
        .with_color(std::io::stdout().is_terminal())
        .with_status(show_status)
}

#[cfg(feature = "cpal-audio")]
fn capture_config(config: &Config) -> FrameCaptureConfig {
    FrameCaptureConfig {
        frame_samples: config.capture.frame_samples,
        ..FrameCaptureConfig::default()
    }
}

/// Open the configured audio input and start framing it.
#[cfg(feature = "cpal-audio")]
fn start_input(
    config: &Config,
    input: &AudioInput,
) -> Result<Option<(tokio::sync::mpsc::Receiver<CaptureFrame>, CaptureHandle)>> {
    let source: Box<dyn AudioSource> = match input {
        AudioInput::None => return Ok(None),
        AudioInput::File(path) => {
            tracing::info!(path = %path.display(), "streaming audio file as microphone");
            Box::new(WavAudioSource::open(path, config.capture.sample_rate)?.with_realtime(true))
        }
        AudioInput::Microphone => Box::new(CpalAudioSource::new(
            config.capture.device.as_deref(),
            config.capture.sample_rate,
        )?),
    };
    spawn_frame_capture(source, capture_config(config)).map(Some)
}

/// Resolves on Ctrl+C. If the signal handler cannot be installed the session
/// runs until the server hangs up.
#[cfg(feature = "cpal-audio")]
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Run an interactive chat until Ctrl+C or until the server hangs up.
#[cfg(feature = "cpal-audio")]
pub async fn run_chat(config: &Config, options: ChatOptions) -> Result<SessionSummary> {
    config.validate()?;

    let (done_tx, done_rx) = tokio::sync::mpsc::unbounded_channel();
    let output = CpalOutput::open(config.playback.device.as_deref(), done_tx)?;
    let player = StreamPlayer::new(output, PlayerConfig::from(&config.playback));

    let channel = WebSocketChannel::connect(&config.server.url).await?;

    let capture = start_input(config, &options.input)?;
    let (frames, handle) = match capture {
        Some((frames, handle)) => (Some(frames), Some(handle)),
        None => (None, None),
    };

    if !options.quiet {
        eprintln!("Connected to {}. Press Ctrl+C to stop.", config.server.url);
    }

    let sink = terminal_sink(options.quiet, options.show_status);
    let mut session = Session::new(channel, player, sink, done_rx).with_config(SessionConfig {
        wait_for_ready: options.wait_for_ready,
        ..SessionConfig::default()
    });
    let result = session.run(frames, interrupted()).await;

    if let Some(handle) = handle {
        handle.stop();
    }
    result
}

/// Replay a capture onto a virtual device, optionally rendering a WAV file.
pub fn run_replay(
    config: &Config,
    file: &Path,
    wav: Option<&Path>,
    quiet: bool,
) -> Result<SessionSummary> {
    config.validate()?;
    let player_config = PlayerConfig::from(&config.playback);
    let sink = terminal_sink(quiet, false);

    match wav {
        Some(out) => {
            let device = WavFileOutput::new(out, player_config.sample_rate);
            replay_on(device, player_config, sink, file)
        }
        None => replay_on(MockOutputDevice::new(), player_config, sink, file),
    }
}

fn replay_on<D: VirtualOutput>(
    device: D,
    player_config: PlayerConfig,
    sink: StdoutSink,
    file: &Path,
) -> Result<SessionSummary> {
    let mut router = EventRouter::new(StreamPlayer::new(device, player_config), sink);
    replay_file(file, &mut router)
}
