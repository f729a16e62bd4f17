//! Audio host helpers shared by microphone capture and speaker output.

use crate::error::{Result, VoxError};
use cpal::traits::{DeviceTrait, HostTrait};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probing makes ALSA/JACK/PipeWire print harmless but alarming noise.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet JACK/ALSA/PipeWire diagnostics before any audio backend is touched.
///
/// # Safety
/// Modifies environment variables; call before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before the runtime starts its workers
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Device names that route through the desktop sound server.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Raw ALSA channel maps and digital outputs nobody wants for a voice chat.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

pub(crate) fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

pub(crate) fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Which side of the sound card a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// List usable device names, marking sound-server devices "\[recommended\]".
pub fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect()),
            Direction::Output => host.output_devices().map(|d| d.collect()),
        }
        .map_err(|e| enumerate_error(direction, e))?;
        Ok::<_, VoxError>(devices)
    })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// Find a device by exact name, or the best default when `name` is `None`.
///
/// The default prefers PipeWire/PulseAudio so the desktop's routing is
/// respected, then falls back to the host default.
pub(crate) fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect()),
            Direction::Output => host.output_devices().map(|d| d.collect()),
        }
        .map_err(|e| enumerate_error(direction, e))?;

        if let Some(wanted) = name {
            return devices
                .into_iter()
                .find(|d| d.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| not_found(direction, wanted));
        }

        if let Some(device) = devices
            .into_iter()
            .find(|d| d.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        let fallback = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        fallback.ok_or_else(|| not_found(direction, "default"))
    })
}

fn enumerate_error(direction: Direction, e: impl std::fmt::Display) -> VoxError {
    let message = format!("Failed to enumerate {} devices: {}", direction.label(), e);
    match direction {
        Direction::Input => VoxError::AudioCapture { message },
        Direction::Output => VoxError::OutputDevice { message },
    }
}

fn not_found(direction: Direction, device: &str) -> VoxError {
    let device = device.to_string();
    match direction {
        Direction::Input => VoxError::InputDeviceNotFound { device },
        Direction::Output => VoxError::OutputDeviceNotFound { device },
    }
}
