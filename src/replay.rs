//! Offline replay of recorded server traffic.
//!
//! Input is JSON Lines, one server message per line. A line is either the
//! bare message or `{"at": <seconds>, "message": {...}}`; `at` moves the
//! virtual device clock forward before the message is handled, which is how
//! a capture reproduces network jitter. Blank lines and `#` comments are
//! skipped.

use crate::error::Result;
use crate::playback::VirtualOutput;
use crate::session::{EventRouter, SessionSummary};
use crate::sink::TranscriptSink;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TimedMessage {
    at: f64,
    message: serde_json::Value,
}

/// Feed every line of `reader` through `router`, then let the device play
/// out what is left.
pub fn replay<R, D, S>(reader: R, router: &mut EventRouter<D, S>) -> Result<SessionSummary>
where
    R: BufRead,
    D: VirtualOutput,
    S: TranscriptSink,
{
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<TimedMessage>(line) {
            Ok(timed) => {
                advance(router, timed.at);
                router.handle_text(&timed.message.to_string())?;
            }
            Err(_) => {
                tracing::trace!(line = index + 1, "replaying message");
                router.handle_text(line)?;
            }
        }
    }

    let finished = router.player_mut().device_mut().finish()?;
    for id in finished {
        router.on_buffer_complete(id);
    }

    let summary = router.finish();
    tracing::info!(
        chunks = summary.audio_chunks,
        seconds = summary.playback.scheduled_seconds,
        starvations = summary.playback.starvations,
        "replay complete"
    );
    Ok(summary)
}

/// Replay a JSONL capture file.
pub fn replay_file<D, S>(path: &Path, router: &mut EventRouter<D, S>) -> Result<SessionSummary>
where
    D: VirtualOutput,
    S: TranscriptSink,
{
    let file = File::open(path)?;
    tracing::debug!(path = %path.display(), "replaying capture");
    replay(BufReader::new(file), router)
}

fn advance<D, S>(router: &mut EventRouter<D, S>, at: f64)
where
    D: VirtualOutput,
    S: TranscriptSink,
{
    if !at.is_finite() || at < router.player().device().current_time() {
        return;
    }
    let finished = router.player_mut().device_mut().advance_to(at);
    for id in finished {
        router.on_buffer_complete(id);
    }
}
