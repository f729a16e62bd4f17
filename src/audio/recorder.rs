use crate::error::{Result, VoxError};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (microphone, WAV file, mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Take whatever mono 16-bit samples arrived since the last call.
    ///
    /// An empty vector means nothing is available yet.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// True once a finite source has handed out all of its samples.
    fn is_exhausted(&self) -> bool {
        false
    }
}

impl<A: AudioSource + ?Sized> AudioSource for Box<A> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        (**self).read_samples()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}

/// Serialize samples as little-endian 16-bit PCM, the binary frame format
/// the backend expects from the microphone.
pub fn encode_pcm_frame(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    samples: Vec<i16>,
    reads_left: Option<usize>,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source returning 10ms of silence per read
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0i16; 160],
            reads_left: None,
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return specific samples
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Return samples `count` times, then report the source exhausted
    pub fn with_reads(mut self, count: usize) -> Self {
        self.reads_left = Some(count);
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(VoxError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(VoxError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        match self.reads_left.as_mut() {
            Some(0) => Ok(Vec::new()),
            Some(left) => {
                *left -= 1;
                Ok(self.samples.clone())
            }
            None => Ok(self.samples.clone()),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.reads_left == Some(0)
    }
}
