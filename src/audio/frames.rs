//! Background capture that slices microphone audio into fixed-size frames.
//!
//! Runs the audio source on its own thread and forwards each full frame to
//! the session over a bounded tokio channel. Capture keeps going until the
//! handle is stopped, the receiver is dropped, or a finite source runs out.

use crate::audio::recorder::AudioSource;
use crate::defaults;
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

/// One frame of captured mono PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFrame {
    pub sequence: u64,
    pub samples: Vec<i16>,
}

#[derive(Debug, Clone)]
pub struct FrameCaptureConfig {
    /// Samples per emitted frame.
    pub frame_samples: usize,
    /// Frames buffered between the capture thread and the session.
    pub channel_frames: usize,
    pub poll_interval: Duration,
}

impl Default for FrameCaptureConfig {
    fn default() -> Self {
        Self {
            frame_samples: defaults::CAPTURE_FRAME_SAMPLES,
            channel_frames: defaults::CAPTURE_CHANNEL_FRAMES,
            poll_interval: Duration::from_millis(defaults::CAPTURE_POLL_MS),
        }
    }
}

/// Start `source` and spawn the thread that frames its output.
pub fn spawn_frame_capture<A: AudioSource + 'static>(
    mut source: A,
    config: FrameCaptureConfig,
) -> Result<(mpsc::Receiver<CaptureFrame>, CaptureHandle)> {
    let frame_samples = config.frame_samples.max(1);
    let (tx, rx) = mpsc::channel(config.channel_frames.max(1));
    let running = Arc::new(AtomicBool::new(false));

    source.start()?;
    running.store(true, Ordering::SeqCst);

    let thread_running = Arc::clone(&running);
    thread::spawn(move || {
        let mut pending: Vec<i16> = Vec::with_capacity(frame_samples * 2);
        let mut sequence = 0u64;

        'capture: while thread_running.load(Ordering::SeqCst) {
            match source.read_samples() {
                Ok(samples) if !samples.is_empty() => {
                    pending.extend_from_slice(&samples);
                    while pending.len() >= frame_samples {
                        let rest = pending.split_off(frame_samples);
                        let frame = CaptureFrame {
                            sequence,
                            samples: std::mem::replace(&mut pending, rest),
                        };
                        sequence += 1;
                        if tx.blocking_send(frame).is_err() {
                            break 'capture;
                        }
                    }
                }
                Ok(_) if source.is_exhausted() => {
                    if !pending.is_empty() {
                        let frame = CaptureFrame {
                            sequence,
                            samples: std::mem::take(&mut pending),
                        };
                        sequence += 1;
                        if tx.blocking_send(frame).is_err() {
                            tracing::trace!("frame receiver gone before final flush");
                        }
                    }
                    tracing::debug!(frames = sequence, "audio source exhausted");
                    break;
                }
                Ok(_) => thread::sleep(config.poll_interval),
                Err(e) => {
                    tracing::error!(error = %e, "audio capture failed");
                    break;
                }
            }
        }

        if let Err(e) = source.stop() {
            tracing::warn!(error = %e, "failed to stop audio source");
        }
        thread_running.store(false, Ordering::SeqCst);
    });

    Ok((rx, CaptureHandle { running }))
}

/// Handle to control a running capture thread.
#[derive(Clone)]
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
}

impl CaptureHandle {
    /// Ask the capture thread to stop after its current read.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
