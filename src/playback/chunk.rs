//! Encoded audio chunks and their conversion to linear samples.
//!
//! Chunks carry base64-encoded 16-bit little-endian mono PCM. The first chunk
//! of a response stream may be prefixed by a 44-byte RIFF/WAVE header, which
//! is dropped according to the configured [`HeaderPolicy`].

use crate::config::HeaderPolicy;
use crate::defaults::{BYTES_PER_SAMPLE, WAV_HEADER_LEN};
use crate::error::DecodeError;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Standard alphabet, tolerant of missing or present padding.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const RIFF_TAG: &[u8; 4] = b"RIFF";

/// One unit of encoded audio as delivered by the message channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Server-assigned chunk number, when the server sends one.
    pub sequence: Option<u64>,
    /// Reported byte size, or the encoded length when the server omits it.
    pub byte_size: usize,
    /// Marks the last chunk of a response.
    pub is_final: bool,
    /// Base64 payload.
    pub data: String,
}

impl AudioChunk {
    pub fn new(data: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            sequence: None,
            byte_size: data.len(),
            is_final: false,
            data,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }
}

/// Decoded mono samples in `[-1.0, 1.0)` with their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedBuffer {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Number of leading bytes to drop from a chunk before sample conversion.
fn header_len(bytes: &[u8], first_of_stream: bool, policy: HeaderPolicy) -> usize {
    if !first_of_stream {
        return 0;
    }
    match policy {
        HeaderPolicy::Always => WAV_HEADER_LEN,
        HeaderPolicy::Sniff if bytes.starts_with(RIFF_TAG) => WAV_HEADER_LEN,
        HeaderPolicy::Sniff | HeaderPolicy::Never => 0,
    }
}

/// Convert little-endian 16-bit PCM bytes to normalized `f32` samples.
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(DecodeError::Truncated {
            len: bytes.len(),
            bytes_per_sample: BYTES_PER_SAMPLE,
        });
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Decode one base64 chunk into samples.
///
/// The header is considered only when `first_of_stream` is set.
///
/// # Errors
/// Returns a [`DecodeError`] for empty payloads, invalid base64, a header with
/// no sample data behind it, or an odd number of PCM bytes.
pub fn decode_chunk(
    encoded: &str,
    first_of_stream: bool,
    policy: HeaderPolicy,
) -> Result<Vec<f32>, DecodeError> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let skip = header_len(&bytes, first_of_stream, policy);
    if skip > 0 && bytes.len() <= skip {
        return Err(DecodeError::HeaderOnly {
            header_len: skip,
            len: bytes.len(),
        });
    }

    pcm16_to_f32(&bytes[skip..])
}

/// Encode raw bytes the way the backend does; used by tests and tooling.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
