//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::host::{Direction, find_device, list_devices, with_suppressed_stderr};
use crate::audio::recorder::AudioSource;
use crate::audio::wav::{downmix, resample};
use crate::error::{Result, VoxError};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// List input devices usable for capture.
pub fn list_input_devices() -> Result<Vec<String>> {
    list_devices(Direction::Input)
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the Mutex in CpalAudioSource,
/// from one thread at a time.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone source producing mono 16-bit PCM at the capture rate.
///
/// Tries the wire format directly (i16, then f32, mono at the capture rate)
/// and falls back to the device's native config with software downmix and
/// resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Mutex<Option<SendableStream>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Open `device_name`, or the preferred default input when `None`.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(Direction::Input, device_name)?;
        if let Ok(name) = device.name() {
            tracing::debug!(device = %name, sample_rate, "opened input device");
        }

        Ok(Self {
            device,
            stream: Mutex::new(None),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            stream_error,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|&s| f32_to_i16(s)));
                }
            },
            stream_error,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Capture at the device's own rate/channels and convert in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| VoxError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native input format, converting in software"
        );

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);

        let stream = match default_config.sample_format() {
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let mono = downmix(data, channels);
                    let converted = resample(&mono, native_rate, target_rate);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                stream_error,
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let as_i16: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    let mono = downmix(&as_i16, channels);
                    let converted = resample(&mono, native_rate, target_rate);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                stream_error,
                None,
            ),
            fmt => {
                return Err(VoxError::AudioCapture {
                    message: format!(
                        "Unsupported native sample format: {:?}. \
                         Try another device with --input-device.",
                        fmt
                    ),
                });
            }
        };

        stream.map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to build native input stream: {}", e),
        })
    }

    fn lock_stream(&self) -> Result<std::sync::MutexGuard<'_, Option<SendableStream>>> {
        self.stream.lock().map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })
    }
}

fn stream_error(err: cpal::StreamError) {
    tracing::error!(error = %err, "input stream error");
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.lock_stream()?.is_some() {
            return Ok(());
        }

        let stream = with_suppressed_stderr(|| self.build_stream())?;
        stream.play().map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never fire
        // the data callback.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            tracing::debug!("no audio delivered with preferred config, retrying native");
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            let native = self.build_stream_native()?;
            native.play().map_err(|e| VoxError::AudioCapture {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            native
        } else {
            stream
        };

        *self.lock_stream()? = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.lock_stream()?.take() {
            stream.0.pause().map_err(|e| VoxError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }
}
