//! Microphone side: sources, framing and sample conversion.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod frames;
#[cfg(feature = "cpal-audio")]
pub mod host;
pub mod recorder;
pub mod wav;
