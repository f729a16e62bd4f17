//! Gap-free playback of streamed TTS audio.
//!
//! ```text
//! server chunk ──► StreamTracker ──► StreamPlayer ──► OutputDevice
//!                  (new stream?)     decode, queue,   (sound card,
//!                                    schedule         WAV file, mock)
//!                                         ▲                 │
//!                                         └── completions ──┘
//! ```

pub mod chunk;
#[cfg(feature = "cpal-audio")]
pub mod cpal_output;
pub mod device;
pub mod player;
pub mod playhead;
pub mod stream;
pub mod wav_output;

pub use chunk::{AudioChunk, DecodedBuffer, decode_chunk};
#[cfg(feature = "cpal-audio")]
pub use cpal_output::{CpalOutput, list_output_devices};
pub use device::{BufferId, CompletionSender, MockOutputDevice, OutputDevice, VirtualOutput};
pub use player::{PlaybackState, PlaybackStats, PlayerConfig, StreamPlayer};
pub use stream::{ChunkPosition, StreamTracker};
pub use wav_output::WavFileOutput;
