//! Sound card output using CPAL.
//!
//! The device clock is the number of frames the render callback has produced.
//! Scheduled buffers are converted to the device rate up front and mixed into
//! each callback at their absolute frame position, so timing is sample exact
//! and independent of callback size.

use crate::audio::host::{Direction, find_device, list_devices, with_suppressed_stderr};
use crate::audio::wav::resample;
use crate::error::{Result, VoxError};
use crate::playback::device::{BufferId, CompletionSender, OutputDevice, ScheduledBuffer};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// List output devices usable for playback.
pub fn list_output_devices() -> Result<Vec<String>> {
    list_devices(Direction::Output)
}

/// A buffer waiting for, or in the middle of, playback.
#[derive(Debug)]
struct ActiveBuffer {
    id: BufferId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl ActiveBuffer {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mixes scheduled mono buffers into interleaved device frames.
#[derive(Debug, Default)]
struct Mixer {
    buffers: Vec<ActiveBuffer>,
}

impl Mixer {
    fn push(&mut self, id: BufferId, start_frame: u64, samples: Vec<f32>) {
        self.buffers.push(ActiveBuffer {
            id,
            start_frame,
            samples,
        });
    }

    /// Fill `out` (interleaved, `channels` wide) with the audio for frames
    /// starting at `base`, returning the buffers that finished in this block.
    fn render(&mut self, out: &mut [f32], channels: usize, base: u64) -> Vec<BufferId> {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let block_end = base + frames;

        for buffer in &self.buffers {
            let from = buffer.start_frame.max(base);
            let to = buffer.end_frame().min(block_end);
            for frame in from..to {
                let sample = buffer.samples[(frame - buffer.start_frame) as usize];
                let slot = ((frame - base) as usize) * channels;
                for value in &mut out[slot..slot + channels] {
                    *value += sample;
                }
            }
        }

        let mut finished = Vec::new();
        self.buffers.retain(|b| {
            if b.end_frame() <= block_end {
                finished.push(b.id);
                false
            } else {
                true
            }
        });
        finished
    }
}

struct Shared {
    mixer: Mutex<Mixer>,
    frames_played: AtomicU64,
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is created, played and dropped by the owner of
/// `CpalOutput`; the audio thread only sees `Shared`.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Live speaker output.
pub struct CpalOutput {
    shared: Arc<Shared>,
    sample_rate: u32,
    device_name: String,
    _stream: SendableStream,
}

impl CpalOutput {
    /// Open `device_name` (or the preferred default) and start its stream.
    ///
    /// Finished buffer ids are sent on `completions` from the audio thread.
    pub fn open(device_name: Option<&str>, completions: CompletionSender) -> Result<Self> {
        let device = find_device(Direction::Output, device_name)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let default_config =
            device
                .default_output_config()
                .map_err(|e| VoxError::OutputDevice {
                    message: format!("Failed to query default output config: {}", e),
                })?;
        let sample_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        let shared = Arc::new(Shared {
            mixer: Mutex::new(Mixer::default()),
            frames_played: AtomicU64::new(0),
        });

        let stream = with_suppressed_stderr(|| {
            build_stream(
                &device,
                &stream_config,
                default_config.sample_format(),
                channels,
                Arc::clone(&shared),
                completions,
            )
        })?;
        stream.play().map_err(|e| VoxError::OutputDevice {
            message: format!("Failed to start output stream: {}", e),
        })?;

        tracing::info!(
            device = %device_name,
            sample_rate,
            channels,
            "audio output ready"
        );

        Ok(Self {
            shared,
            sample_rate,
            device_name,
            _stream: SendableStream(stream),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    channels: usize,
    shared: Arc<Shared>,
    completions: CompletionSender,
) -> Result<cpal::Stream> {
    let err_callback = |err: cpal::StreamError| {
        tracing::error!(error = %err, "output stream error");
    };

    let stream = match format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render_block(&shared, &completions, data, channels);
            },
            err_callback,
            None,
        ),
        cpal::SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    render_block(&shared, &completions, &mut scratch, channels);
                    for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                        *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    }
                },
                err_callback,
                None,
            )
        }
        fmt => {
            return Err(VoxError::OutputDevice {
                message: format!(
                    "Unsupported output sample format: {:?}. \
                     Try another device with --output-device.",
                    fmt
                ),
            });
        }
    };

    stream.map_err(|e| VoxError::OutputDevice {
        message: format!("Failed to build output stream: {}", e),
    })
}

fn render_block(shared: &Shared, completions: &CompletionSender, data: &mut [f32], channels: usize) {
    let base = shared.frames_played.load(Ordering::Acquire);
    let finished = match shared.mixer.lock() {
        Ok(mut mixer) => mixer.render(data, channels, base),
        Err(_) => {
            data.fill(0.0);
            Vec::new()
        }
    };
    let frames = (data.len() / channels.max(1)) as u64;
    shared.frames_played.fetch_add(frames, Ordering::Release);

    for id in finished {
        if completions.send(id).is_err() {
            break;
        }
    }
}

/// Start frame and length of a buffer on the device timeline.
///
/// Both ends are rounded from absolute times, so buffers that touch in
/// seconds also touch in frames after rate conversion.
fn frame_span(buffer: &ScheduledBuffer, device_rate: u32) -> (u64, usize) {
    let rate = device_rate as f64;
    let start = (buffer.start_at * rate).round().max(0.0) as u64;
    let end = (buffer.end_at() * rate).round().max(0.0) as u64;
    (start, end.saturating_sub(start) as usize)
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        self.shared.frames_played.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, buffer: ScheduledBuffer) -> Result<()> {
        let mut samples = resample(&buffer.samples[..], buffer.sample_rate, self.sample_rate);
        let (start_frame, frames) = frame_span(&buffer, self.sample_rate);
        let fill = samples.last().copied().unwrap_or(0.0);
        samples.resize(frames, fill);
        let mut mixer = self.shared.mixer.lock().map_err(|e| VoxError::OutputDevice {
            message: format!("Failed to lock mixer: {}", e),
        })?;
        mixer.push(buffer.id, start_frame, samples);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}
