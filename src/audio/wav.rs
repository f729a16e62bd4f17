//! WAV input and sample-rate conversion shared by capture and playback.

use crate::audio::recorder::AudioSource;
use crate::error::{Result, VoxError};
use std::io::Read;
use std::time::{Duration, Instant};

/// Audio source that streams a WAV file as if it were a microphone.
///
/// Samples are downmixed to mono and resampled to the capture rate. In
/// realtime mode a chunk is released only once the equivalent wall-clock
/// time has passed, so the backend receives audio at speaking pace.
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    chunk_size: usize,
    sample_rate: u32,
    realtime: bool,
    started_at: Option<Instant>,
}

impl WavAudioSource {
    /// Parse WAV data from any reader, converting to `sample_rate` mono.
    pub fn from_reader(reader: Box<dyn Read + Send>, sample_rate: u32) -> Result<Self> {
        let mut wav_reader =
            hound::WavReader::new(reader).map_err(|e| VoxError::AudioCapture {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = wav_reader.spec();
        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VoxError::AudioCapture {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        let mono = downmix(&raw_samples, spec.channels as usize);
        let samples = resample(&mono, spec.sample_rate, sample_rate);

        Ok(Self {
            samples,
            position: 0,
            // 100ms per read
            chunk_size: (sample_rate as usize / 10).max(1),
            sample_rate,
            realtime: false,
            started_at: None,
        })
    }

    pub fn open(path: &std::path::Path, sample_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)), sample_rate)
    }

    /// Release samples no faster than they would play.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples the wall clock allows us to hand out so far.
    fn released_limit(&self) -> usize {
        match (self.realtime, self.started_at) {
            (true, Some(started)) => {
                let elapsed = started.elapsed().as_secs_f64();
                ((elapsed * self.sample_rate as f64) as usize).min(self.samples.len())
            }
            _ => self.samples.len(),
        }
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let limit = self.released_limit();
        if self.position >= limit {
            return Ok(Vec::new());
        }

        let end = (self.position + self.chunk_size).min(limit);
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.samples.len()
    }
}

/// Sample types the resampler can interpolate.
pub trait Sample: Copy {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl Sample for i16 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }
}

impl Sample for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

/// Average interleaved channels into one.
pub fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample<S: Sample>(samples: &[S], from_rate: u32, to_rate: u32) -> Vec<S> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx].to_f64();
                let right = samples[source_idx + 1].to_f64();
                S::from_f64(left + (right - left) * fraction)
            }
        })
        .collect()
}

/// Duration of `samples` mono samples at `sample_rate`.
pub fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples as f64 / sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn source(wav: Vec<u8>, rate: u32) -> WavAudioSource {
        WavAudioSource::from_reader(Box::new(Cursor::new(wav)), rate).unwrap()
    }

    #[test]
    fn from_reader_at_capture_rate_is_unchanged() {
        let input = vec![100i16, 200, 300, 400, 500];
        let wav = source(make_wav_data(16000, 1, &input), 16000);
        assert_eq!(wav.samples, input);
        assert_eq!(wav.chunk_size, 1600);
    }

    #[test]
    fn stereo_is_downmixed() {
        let stereo = vec![100i16, 200, 300, 400, 500, 600];
        let wav = source(make_wav_data(16000, 2, &stereo), 16000);
        assert_eq!(wav.samples, vec![150i16, 350, 550]);
    }

    #[test]
    fn resampled_to_capture_rate() {
        let input = vec![1000i16; 44100];
        let wav = source(make_wav_data(44100, 1, &input), 16000);
        assert!((15900..=16100).contains(&wav.len()));
        assert!(wav.samples.iter().all(|&s| (900..=1100).contains(&s)));
    }

    #[test]
    fn reads_in_100ms_chunks_then_exhausts() {
        let mut wav = source(make_wav_data(16000, 1, &[1i16; 3400]), 16000);
        wav.start().unwrap();

        assert_eq!(wav.read_samples().unwrap().len(), 1600);
        assert_eq!(wav.read_samples().unwrap().len(), 1600);
        assert!(!wav.is_exhausted());
        assert_eq!(wav.read_samples().unwrap().len(), 200);
        assert!(wav.is_exhausted());
        assert!(wav.read_samples().unwrap().is_empty());
    }

    #[test]
    fn realtime_source_holds_back_future_audio() {
        let mut wav = source(make_wav_data(16000, 1, &[1i16; 16000]), 16000).with_realtime(true);
        wav.start().unwrap();

        // Less than a second of wall time has passed
        let first = wav.read_samples().unwrap();
        assert!(first.len() < 16000);
        assert!(!wav.is_exhausted());
    }

    #[test]
    fn invalid_wav_data_returns_error() {
        let result = WavAudioSource::from_reader(Box::new(Cursor::new(vec![0u8, 1, 2, 3])), 16000);
        match result {
            Err(VoxError::AudioCapture { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            _ => panic!("Expected AudioCapture error"),
        }
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![100i16, 200, 300];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let resampled = resample(&[0i16, 1000, 2000], 8000, 16000);
        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0);
        assert_eq!(resampled[1], 500);
        assert_eq!(resampled[2], 1000);
    }

    #[test]
    fn resample_f32_keeps_level() {
        let samples = vec![0.25f32; 44100];
        let resampled = resample(&samples, 44100, 48000);
        assert!((47999..=48001).contains(&resampled.len()));
        assert!(resampled.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn duration_helper() {
        assert_eq!(samples_duration(8000, 16000), Duration::from_millis(500));
        assert_eq!(samples_duration(10, 0), Duration::ZERO);
    }
}
