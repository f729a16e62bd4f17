//! Offline output device that renders the playback timeline to a WAV file.

use crate::audio::wav::resample;
use crate::error::{Result, VoxError};
use crate::playback::device::{
    BufferId, CompletionSender, OutputDevice, ScheduledBuffer, VirtualOutput, VirtualTimeline,
};
use std::path::{Path, PathBuf};

/// Virtual-clock device writing everything it is given to a 16-bit mono WAV.
///
/// Buffers are mixed at their scheduled start times, so gaps left by
/// starvation come out as silence and overlaps as summed audio. The file is
/// written by [`VirtualOutput::finish`].
pub struct WavFileOutput {
    path: PathBuf,
    sample_rate: u32,
    timeline: VirtualTimeline,
    scheduled: Vec<ScheduledBuffer>,
    completions: Option<CompletionSender>,
    written: bool,
}

impl WavFileOutput {
    pub fn new(path: impl AsRef<Path>, sample_rate: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sample_rate,
            timeline: VirtualTimeline::default(),
            scheduled: Vec::new(),
            completions: None,
            written: false,
        }
    }

    pub fn with_completion_sender(mut self, tx: CompletionSender) -> Self {
        self.completions = Some(tx);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mix every scheduled buffer onto one timeline starting at clock zero.
    pub fn render(&self) -> Vec<f32> {
        let rate = self.sample_rate as f64;
        let end = self
            .scheduled
            .iter()
            .map(ScheduledBuffer::end_at)
            .fold(0.0, f64::max);
        let mut out = vec![0.0f32; (end * rate).ceil() as usize];

        for buffer in &self.scheduled {
            let samples = resample(&buffer.samples[..], buffer.sample_rate, self.sample_rate);
            let offset = (buffer.start_at * rate).round().max(0.0) as usize;
            if offset >= out.len() {
                continue;
            }
            for (slot, sample) in out[offset..].iter_mut().zip(samples) {
                *slot += sample;
            }
        }
        out
    }

    fn write(&self) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&self.path, spec)?;
        for sample in self.render() {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;
        tracing::info!(path = %self.path.display(), "rendered playback to WAV");
        Ok(())
    }

    fn notify(&self, finished: &[BufferId]) {
        if let Some(tx) = &self.completions {
            for &id in finished {
                if tx.send(id).is_err() {
                    break;
                }
            }
        }
    }
}

impl OutputDevice for WavFileOutput {
    fn current_time(&self) -> f64 {
        self.timeline.now()
    }

    fn schedule(&mut self, buffer: ScheduledBuffer) -> Result<()> {
        if self.written {
            return Err(VoxError::OutputDevice {
                message: format!("{} is already finalized", self.path.display()),
            });
        }
        self.scheduled.push(buffer.clone());
        self.timeline.push(buffer);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "wav-file"
    }
}

impl VirtualOutput for WavFileOutput {
    fn advance_to(&mut self, time: f64) -> Vec<BufferId> {
        let finished = self.timeline.advance_to(time);
        self.notify(&finished);
        finished
    }

    fn finish(&mut self) -> Result<Vec<BufferId>> {
        let end = self.timeline.latest_end();
        let finished = self.advance_to(end);
        if !self.written {
            self.write()?;
            self.written = true;
        }
        Ok(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn buffer(id: BufferId, start_at: f64, samples: Vec<f32>) -> ScheduledBuffer {
        ScheduledBuffer {
            id,
            start_at,
            sample_rate: 1000,
            samples: samples.into(),
        }
    }

    #[test]
    fn render_places_buffers_at_start_times() {
        let mut output = WavFileOutput::new("unused.wav", 1000);
        output.schedule(buffer(1, 0.0, vec![0.5; 10])).unwrap();
        output.schedule(buffer(2, 0.02, vec![0.25; 10])).unwrap();

        let rendered = output.render();

        assert_eq!(rendered.len(), 30);
        assert!(rendered[..10].iter().all(|&s| s == 0.5));
        assert!(rendered[10..20].iter().all(|&s| s == 0.0));
        assert!(rendered[20..].iter().all(|&s| s == 0.25));
    }

    #[test]
    fn overlapping_buffers_are_summed() {
        let mut output = WavFileOutput::new("unused.wav", 1000);
        output.schedule(buffer(1, 0.0, vec![0.25; 10])).unwrap();
        output.schedule(buffer(2, 0.005, vec![0.25; 10])).unwrap();

        let rendered = output.render();

        assert_eq!(rendered[2], 0.25);
        assert_eq!(rendered[7], 0.5);
        assert_eq!(rendered[12], 0.25);
    }

    #[test]
    fn render_resamples_to_output_rate() {
        let mut output = WavFileOutput::new("unused.wav", 2000);
        output.schedule(buffer(1, 0.0, vec![0.1; 100])).unwrap();
        assert_eq!(output.render().len(), 200);
    }

    #[test]
    fn finish_writes_readable_wav() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let mut output = WavFileOutput::new(&path, 1000);
        output.schedule(buffer(1, 0.1, vec![0.5; 100])).unwrap();

        let finished = output.finish().unwrap();
        assert_eq!(finished, vec![1]);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 1000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 200);
    }

    #[test]
    fn schedule_after_finish_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut output = WavFileOutput::new(dir.path().join("out.wav"), 1000);
        output.finish().unwrap();

        let result = output.schedule(buffer(1, 0.0, vec![0.0; 10]));
        assert!(matches!(result, Err(VoxError::OutputDevice { .. })));
    }

    #[test]
    fn finish_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let mut output = WavFileOutput::new(dir.path().join("missing").join("out.wav"), 1000);
        output.schedule(buffer(1, 0.0, vec![0.0; 10])).unwrap();
        assert!(output.finish().is_err());
    }
}
