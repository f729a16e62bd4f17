//! Where transcripts and agent replies go.

use crate::error::Result;

/// Pluggable text output for a chat session.
///
/// Pairs with `AudioSource` on the input side: the source feeds the backend,
/// the sink shows what came back.
pub trait TranscriptSink: Send {
    /// The user's speech as transcribed by the backend.
    fn transcript(&mut self, text: &str, is_final: bool) -> Result<()>;

    /// Agent reply text. `partial` chunks continue the current reply.
    fn agent_text(&mut self, text: &str, partial: bool) -> Result<()>;

    /// The current agent reply is complete.
    fn agent_done(&mut self) -> Result<()> {
        Ok(())
    }

    /// Informational message from the backend.
    fn status(&mut self, _message: &str) -> Result<()> {
        Ok(())
    }

    /// Error reported by the backend.
    fn error(&mut self, source: &str, message: &str) -> Result<()>;

    /// Called on session shutdown. Return the accumulated transcript if any.
    fn finish(&mut self) -> Option<String> {
        None
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Sink that remembers everything; used by tests and replay.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CollectorSink {
    pub transcripts: Vec<String>,
    pub partials: usize,
    /// One entry per agent reply.
    pub replies: Vec<String>,
    pub statuses: Vec<String>,
    pub errors: Vec<String>,
    reply_open: bool,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TranscriptSink for CollectorSink {
    fn transcript(&mut self, text: &str, is_final: bool) -> Result<()> {
        if is_final {
            self.transcripts.push(text.to_string());
        } else {
            self.partials += 1;
        }
        Ok(())
    }

    fn agent_text(&mut self, text: &str, partial: bool) -> Result<()> {
        match (partial, self.reply_open, self.replies.last_mut()) {
            (true, true, Some(reply)) => reply.push_str(text),
            _ => self.replies.push(text.to_string()),
        }
        self.reply_open = partial;
        Ok(())
    }

    fn agent_done(&mut self) -> Result<()> {
        self.reply_open = false;
        Ok(())
    }

    fn status(&mut self, message: &str) -> Result<()> {
        self.statuses.push(message.to_string());
        Ok(())
    }

    fn error(&mut self, source: &str, message: &str) -> Result<()> {
        self.errors.push(format!("{}: {}", source, message));
        Ok(())
    }

    fn finish(&mut self) -> Option<String> {
        if self.transcripts.is_empty() {
            None
        } else {
            Some(self.transcripts.join(" "))
        }
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

#[cfg(feature = "cli")]
pub use terminal::StdoutSink;

#[cfg(feature = "cli")]
mod terminal {
    use super::TranscriptSink;
    use crate::error::Result;
    use owo_colors::OwoColorize;
    use std::io::{self, Write};

    const CLEAR_LINE: &str = "\r\x1b[2K";

    /// Interactive terminal output.
    ///
    /// Partial transcripts overwrite the current line; streamed agent text is
    /// appended to an open "agent" line until the reply completes.
    pub struct StdoutSink {
        out: Box<dyn Write + Send>,
        color: bool,
        show_status: bool,
        partial_shown: bool,
        reply_open: bool,
        transcripts: Vec<String>,
    }

    impl StdoutSink {
        pub fn new() -> Self {
            Self::with_writer(Box::new(io::stdout()))
        }

        pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
            Self {
                out,
                color: true,
                show_status: false,
                partial_shown: false,
                reply_open: false,
                transcripts: Vec::new(),
            }
        }

        pub fn with_color(mut self, color: bool) -> Self {
            self.color = color;
            self
        }

        /// Also print backend status messages.
        pub fn with_status(mut self, show: bool) -> Self {
            self.show_status = show;
            self
        }

        fn label(&self, text: &'static str, agent: bool) -> String {
            match (self.color, agent) {
                (false, _) => text.to_string(),
                (true, false) => text.cyan().bold().to_string(),
                (true, true) => text.green().bold().to_string(),
            }
        }

        fn close_lines(&mut self) -> Result<()> {
            if self.partial_shown {
                write!(self.out, "{}", CLEAR_LINE)?;
                self.partial_shown = false;
            }
            if self.reply_open {
                writeln!(self.out)?;
                self.reply_open = false;
            }
            Ok(())
        }
    }

    impl Default for StdoutSink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TranscriptSink for StdoutSink {
        fn transcript(&mut self, text: &str, is_final: bool) -> Result<()> {
            if self.reply_open {
                writeln!(self.out)?;
                self.reply_open = false;
            }
            let you = self.label("you>", false);
            if is_final {
                write!(self.out, "{}", CLEAR_LINE)?;
                writeln!(self.out, "{} {}", you, text)?;
                self.partial_shown = false;
                self.transcripts.push(text.to_string());
            } else {
                let shown = if self.color {
                    text.dimmed().to_string()
                } else {
                    text.to_string()
                };
                write!(self.out, "{}{} {}", CLEAR_LINE, you, shown)?;
                self.partial_shown = true;
            }
            self.out.flush()?;
            Ok(())
        }

        fn agent_text(&mut self, text: &str, partial: bool) -> Result<()> {
            if self.partial_shown {
                write!(self.out, "{}", CLEAR_LINE)?;
                self.partial_shown = false;
            }
            if !partial && self.reply_open {
                writeln!(self.out)?;
                self.reply_open = false;
            }
            if !self.reply_open {
                let agent = self.label("agent>", true);
                write!(self.out, "{} ", agent)?;
            }
            write!(self.out, "{}", text)?;
            if partial {
                self.reply_open = true;
            } else {
                writeln!(self.out)?;
            }
            self.out.flush()?;
            Ok(())
        }

        fn agent_done(&mut self) -> Result<()> {
            if self.reply_open {
                writeln!(self.out)?;
                self.reply_open = false;
                self.out.flush()?;
            }
            Ok(())
        }

        fn status(&mut self, message: &str) -> Result<()> {
            if !self.show_status {
                return Ok(());
            }
            self.close_lines()?;
            if self.color {
                writeln!(self.out, "{}", message.dimmed())?;
            } else {
                writeln!(self.out, "{}", message)?;
            }
            Ok(())
        }

        fn error(&mut self, source: &str, message: &str) -> Result<()> {
            self.close_lines()?;
            let line = format!("[{} error] {}", source, message);
            if self.color {
                writeln!(self.out, "{}", line.red())?;
            } else {
                writeln!(self.out, "{}", line)?;
            }
            self.out.flush()?;
            Ok(())
        }

        fn finish(&mut self) -> Option<String> {
            let flushed = self
                .close_lines()
                .and_then(|()| self.out.flush().map_err(Into::into));
            if let Err(e) = flushed {
                tracing::debug!(error = %e, "failed to flush terminal output");
            }
            if self.transcripts.is_empty() {
                None
            } else {
                Some(self.transcripts.join(" "))
            }
        }

        fn name(&self) -> &'static str {
            "stdout"
        }
    }
}
