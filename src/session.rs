//! One conversation with the backend.
//!
//! A single task owns the message channel, the playback buffer and the
//! transcript sink. Server messages, device completion notifications and
//! microphone frames are multiplexed with `tokio::select!`, so the playback
//! queue is only ever touched from this loop.

use crate::audio::frames::CaptureFrame;
use crate::audio::recorder::encode_pcm_frame;
use crate::defaults;
use crate::error::{Result, VoxError};
use crate::playback::{BufferId, OutputDevice, PlaybackStats, StreamPlayer, StreamTracker};
use crate::protocol::{ClientCommand, ServerMessage, SessionEvent};
use crate::sink::TranscriptSink;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// A frame received from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
}

/// Bidirectional message transport to the backend.
///
/// This trait allows swapping implementations (WebSocket, in-memory).
#[async_trait]
pub trait MessageChannel: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;

    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()>;

    /// Next message from the server, or `None` once the connection closed.
    async fn recv(&mut self) -> Result<Option<Inbound>>;

    async fn close(&mut self) -> Result<()>;
}

/// WebSocket connection via tokio-tungstenite.
pub struct WebSocketChannel {
    url: String,
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl WebSocketChannel {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| VoxError::Connection {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        tracing::info!(url, status = %response.status(), "connected to backend");
        Ok(Self {
            url: url.to_string(),
            stream,
        })
    }

    fn channel_error(&self, e: impl fmt::Display) -> VoxError {
        VoxError::Channel {
            message: format!("{}: {}", self.url, e),
        }
    }
}

#[async_trait]
impl MessageChannel for WebSocketChannel {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::Message;

        let result = self.stream.send(Message::Text(text.to_string())).await;
        result.map_err(|e| self.channel_error(e))
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::Message;

        let result = self.stream.send(Message::Binary(data)).await;
        result.map_err(|e| self.channel_error(e))
    }

    async fn recv(&mut self) -> Result<Option<Inbound>> {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message;

        loop {
            let next = self.stream.next().await;
            match next {
                None => return Ok(None),
                Some(Err(e)) => return Err(self.channel_error(e)),
                Some(Ok(Message::Text(text))) => return Ok(Some(Inbound::Text(text))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Inbound::Binary(data))),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "server closed the connection");
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let result = self.stream.close(None).await;
        match result {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(self.channel_error(e)),
        }
    }
}

/// What the client sent on an [`InMemoryChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

/// Channel backed by tokio mpsc queues; the test side holds the other ends.
pub struct InMemoryChannel {
    incoming: mpsc::UnboundedReceiver<Inbound>,
    outgoing: mpsc::UnboundedSender<Outbound>,
    closed: bool,
}

/// Server side of an [`InMemoryChannel`].
pub struct InMemoryServer {
    to_client: Option<mpsc::UnboundedSender<Inbound>>,
    from_client: mpsc::UnboundedReceiver<Outbound>,
}

impl InMemoryServer {
    pub fn send(&self, msg: Inbound) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(msg).is_ok())
    }

    pub fn send_json(&self, json: &str) -> bool {
        self.send(Inbound::Text(json.to_string()))
    }

    /// Hang up; the client sees end of stream once it has read what was sent.
    pub fn disconnect(&mut self) {
        self.to_client = None;
    }

    /// Everything the client has sent so far.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut sent = Vec::new();
        while let Ok(msg) = self.from_client.try_recv() {
            sent.push(msg);
        }
        sent
    }
}

impl InMemoryChannel {
    pub fn pair() -> (Self, InMemoryServer) {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        (
            Self {
                incoming,
                outgoing,
                closed: false,
            },
            InMemoryServer {
                to_client: Some(to_client),
                from_client,
            },
        )
    }

    fn push(&self, msg: Outbound) -> Result<()> {
        if self.closed {
            return Err(VoxError::Channel {
                message: "channel closed".to_string(),
            });
        }
        self.outgoing.send(msg).map_err(|_| VoxError::Channel {
            message: "server side dropped".to_string(),
        })
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.push(Outbound::Text(text.to_string()))
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.push(Outbound::Binary(data))
    }

    async fn recv(&mut self) -> Result<Option<Inbound>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.incoming.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Reaction the transport loop owes a server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterAction {
    None,
    /// Server is ready; send `start_streaming` and begin forwarding audio.
    StartStreaming,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct RouterCounters {
    messages: u64,
    invalid_messages: u64,
    audio_chunks: u64,
    audio_bytes: u64,
    server_errors: u64,
}

/// Dispatches decoded server messages to the playback buffer and the sink.
///
/// Shared by the live session and offline replay.
pub struct EventRouter<D: OutputDevice, S: TranscriptSink> {
    player: StreamPlayer<D>,
    tracker: StreamTracker,
    sink: S,
    explicit_start: bool,
    counters: RouterCounters,
}

impl<D: OutputDevice, S: TranscriptSink> EventRouter<D, S> {
    pub fn new(player: StreamPlayer<D>, sink: S) -> Self {
        Self {
            player,
            tracker: StreamTracker::new(),
            sink,
            explicit_start: false,
            counters: RouterCounters::default(),
        }
    }

    /// Parse and dispatch one text frame. Malformed JSON is logged and skipped.
    pub fn handle_text(&mut self, text: &str) -> Result<RouterAction> {
        match ServerMessage::from_json(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                self.counters.invalid_messages += 1;
                tracing::warn!(error = %e, "ignoring malformed server message");
                Ok(RouterAction::None)
            }
        }
    }

    /// Dispatch one server message.
    ///
    /// # Errors
    /// Only sink failures are returned; playback problems are logged and the
    /// session carries on.
    pub fn handle_message(&mut self, message: ServerMessage) -> Result<RouterAction> {
        self.counters.messages += 1;
        tracing::trace!(kind = message.kind(), "server message");

        match message.into_event() {
            SessionEvent::Ready { session_id } => {
                tracing::info!(session_id = session_id.as_deref(), "backend ready");
                return Ok(RouterAction::StartStreaming);
            }
            SessionEvent::AudioChunk(chunk) => {
                self.counters.audio_chunks += 1;
                self.counters.audio_bytes += chunk.byte_size as u64;

                let position = self.tracker.observe(&chunk);
                if position.is_first() {
                    if self.explicit_start {
                        self.explicit_start = false;
                    } else {
                        self.player.reset();
                    }
                }
                if let Err(e) = self.player.push_chunk(&chunk, position.is_first()) {
                    tracing::warn!(error = %e, "audio chunk not played");
                }
            }
            SessionEvent::StreamStart { user_message } => {
                if self.tracker.begin() {
                    tracing::debug!(user_message = user_message.as_deref(), "response stream starting");
                    self.player.reset();
                    self.explicit_start = true;
                }
            }
            SessionEvent::Transcript { text, is_final } => self.sink.transcript(&text, is_final)?,
            SessionEvent::AgentText { text, partial } => self.sink.agent_text(&text, partial)?,
            SessionEvent::AgentDone => self.sink.agent_done()?,
            SessionEvent::TurnEnded { transcript } => match transcript {
                Some(text) => tracing::info!(transcript = %text, "turn ended"),
                None => tracing::info!("turn ended without speech"),
            },
            SessionEvent::ServerError { source, message } => {
                self.counters.server_errors += 1;
                tracing::warn!(source, %message, "backend reported an error");
                self.sink.error(source, &message)?;
            }
            SessionEvent::Status { message } => {
                tracing::debug!(%message, "backend status");
                self.sink.status(&message)?;
            }
            SessionEvent::Ignored => {}
        }
        Ok(RouterAction::None)
    }

    /// Device notification that a scheduled buffer finished.
    pub fn on_buffer_complete(&mut self, id: BufferId) {
        if let Err(e) = self.player.on_buffer_complete(id) {
            tracing::warn!(error = %e, "playback stopped while resuming queue");
        }
    }

    pub fn player(&self) -> &StreamPlayer<D> {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut StreamPlayer<D> {
        &mut self.player
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Snapshot of the counters, finishing the sink.
    pub fn finish(&mut self) -> SessionSummary {
        SessionSummary {
            messages: self.counters.messages,
            invalid_messages: self.counters.invalid_messages,
            audio_chunks: self.counters.audio_chunks,
            audio_bytes: self.counters.audio_bytes,
            streams: self.tracker.streams(),
            server_errors: self.counters.server_errors,
            frames_sent: 0,
            bytes_sent: 0,
            playback: self.player.stats().clone(),
            transcript: self.sink.finish(),
        }
    }

    pub fn into_parts(self) -> (StreamPlayer<D>, S) {
        (self.player, self.sink)
    }
}

/// Totals reported when a session or replay ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub messages: u64,
    pub invalid_messages: u64,
    pub audio_chunks: u64,
    pub audio_bytes: u64,
    pub streams: u64,
    pub server_errors: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub playback: PlaybackStats,
    /// Final transcripts joined, if the sink keeps them.
    pub transcript: Option<String>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "messages:      {} ({} malformed, {} errors)",
            self.messages, self.invalid_messages, self.server_errors
        )?;
        writeln!(
            f,
            "audio in:      {} chunks, {} bytes, {} streams",
            self.audio_chunks, self.audio_bytes, self.streams
        )?;
        writeln!(
            f,
            "played:        {:.2}s in {} buffers ({} dropped)",
            self.playback.scheduled_seconds,
            self.playback.buffers_scheduled,
            self.playback.chunks_dropped
        )?;
        writeln!(
            f,
            "starvations:   {} (device failures: {})",
            self.playback.starvations, self.playback.device_failures
        )?;
        write!(
            f,
            "microphone:    {} frames, {} bytes sent",
            self.frames_sent, self.bytes_sent
        )
    }
}

/// Behaviour switches for [`Session::run`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hold microphone audio until the backend announces it is ready.
    pub wait_for_ready: bool,
    /// Tell the backend when a finite audio input ran out.
    pub send_eof: bool,
    /// After the server hangs up, let scheduled audio finish for at most
    /// this long.
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wait_for_ready: true,
            send_eof: true,
            drain_timeout: Duration::from_secs(defaults::DRAIN_TIMEOUT_SECS),
        }
    }
}

/// Why the session loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Shutdown,
    ServerClosed,
}

/// Live conversation: transport + playback + transcript output.
pub struct Session<C: MessageChannel, D: OutputDevice, S: TranscriptSink> {
    channel: C,
    router: EventRouter<D, S>,
    completions: mpsc::UnboundedReceiver<BufferId>,
    config: SessionConfig,
    pending_frames: VecDeque<Vec<i16>>,
    streaming: bool,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<C: MessageChannel, D: OutputDevice, S: TranscriptSink> Session<C, D, S> {
    /// `completions` must be the receiving end of the sender the output
    /// device reports finished buffers on.
    pub fn new(
        channel: C,
        player: StreamPlayer<D>,
        sink: S,
        completions: mpsc::UnboundedReceiver<BufferId>,
    ) -> Self {
        Self {
            channel,
            router: EventRouter::new(player, sink),
            completions,
            config: SessionConfig::default(),
            pending_frames: VecDeque::new(),
            streaming: false,
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn router(&self) -> &EventRouter<D, S> {
        &self.router
    }

    /// Drive the conversation until `shutdown` resolves or the server hangs
    /// up, then say goodbye and report what happened.
    ///
    /// `frames` carries microphone audio; `None` runs a listen-only session.
    pub async fn run<F>(
        &mut self,
        mut frames: Option<mpsc::Receiver<CaptureFrame>>,
        shutdown: F,
    ) -> Result<SessionSummary>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        if !self.config.wait_for_ready {
            self.streaming = true;
        }

        let reason = loop {
            let capture_open = frames.is_some();
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down session");
                    break StopReason::Shutdown;
                }
                inbound = self.channel.recv() => match inbound? {
                    Some(Inbound::Text(text)) => {
                        if self.router.handle_text(&text)? == RouterAction::StartStreaming {
                            self.start_streaming().await?;
                        }
                    }
                    Some(Inbound::Binary(data)) => {
                        tracing::debug!(bytes = data.len(), "ignoring binary frame from server");
                    }
                    None => {
                        tracing::info!("server closed the session");
                        break StopReason::ServerClosed;
                    }
                },
                Some(id) = self.completions.recv() => self.router.on_buffer_complete(id),
                frame = next_frame(&mut frames), if capture_open => match frame {
                    Some(frame) => self.forward_frame(frame.samples).await?,
                    None => {
                        frames = None;
                        tracing::debug!("microphone input ended");
                        if self.config.send_eof && self.streaming {
                            self.channel.send_text(ClientCommand::EndOfAudio.as_str()).await?;
                        }
                    }
                },
            }
        };

        match reason {
            StopReason::Shutdown => {
                if self.streaming
                    && let Err(e) = self
                        .channel
                        .send_text(ClientCommand::StopStreaming.as_str())
                        .await
                {
                    tracing::debug!(error = %e, "could not send stop_streaming");
                }
            }
            StopReason::ServerClosed => self.drain_playback().await,
        }
        if let Err(e) = self.channel.close().await {
            tracing::debug!(error = %e, "error closing channel");
        }

        let mut summary = self.router.finish();
        summary.frames_sent = self.frames_sent;
        summary.bytes_sent = self.bytes_sent;
        Ok(summary)
    }

    async fn start_streaming(&mut self) -> Result<()> {
        if self.streaming {
            return Ok(());
        }
        self.channel
            .send_text(ClientCommand::StartStreaming.as_str())
            .await?;
        self.streaming = true;
        while let Some(samples) = self.pending_frames.pop_front() {
            self.send_frame(samples).await?;
        }
        Ok(())
    }

    async fn forward_frame(&mut self, samples: Vec<i16>) -> Result<()> {
        if self.streaming {
            return self.send_frame(samples).await;
        }
        // Keep only the most recent second or so while waiting for the server
        if self.pending_frames.len() >= defaults::PENDING_FRAMES {
            self.pending_frames.pop_front();
        }
        self.pending_frames.push_back(samples);
        Ok(())
    }

    async fn send_frame(&mut self, samples: Vec<i16>) -> Result<()> {
        let bytes = encode_pcm_frame(&samples);
        self.bytes_sent += bytes.len() as u64;
        self.frames_sent += 1;
        self.channel.send_binary(bytes).await
    }

    /// Wait for audio that is already scheduled to finish playing.
    async fn drain_playback(&mut self) {
        let player = self.router.player();
        if player.in_flight() == 0 {
            return;
        }
        let now = player.device().current_time();
        let remaining = Duration::from_secs_f64(player.playhead().ahead_of(now) + defaults::DRAIN_GRACE_SECS);
        let limit = remaining.min(self.config.drain_timeout);
        tracing::debug!(seconds = limit.as_secs_f64(), "waiting for playback to finish");

        let drained = tokio::time::timeout(limit, async {
            while self.router.player().in_flight() > 0 {
                match self.completions.recv().await {
                    Some(id) => self.router.on_buffer_complete(id),
                    None => break,
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!("playback still running at drain timeout");
        }
    }
}

async fn next_frame(frames: &mut Option<mpsc::Receiver<CaptureFrame>>) -> Option<CaptureFrame> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::chunk::encode_base64;
    use crate::playback::{MockOutputDevice, PlayerConfig};
    use crate::sink::CollectorSink;

    fn pcm_b64(samples: usize) -> String {
        let bytes: Vec<u8> = std::iter::repeat_n(100i16, samples)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        encode_base64(&bytes)
    }

    fn router() -> EventRouter<MockOutputDevice, CollectorSink> {
        let config = PlayerConfig {
            sample_rate: 16000,
            ..PlayerConfig::default()
        };
        EventRouter::new(
            StreamPlayer::new(MockOutputDevice::new(), config),
            CollectorSink::new(),
        )
    }

    fn chunk_json(seq: u64, samples: usize, is_final: bool) -> String {
        format!(
            r#"{{"type":"tts_audio_chunk","audio_base64":"{}","chunk_number":{},"is_final":{}}}"#,
            pcm_b64(samples),
            seq,
            is_final
        )
    }

    #[test]
    fn router_plays_chunks_back_to_back() {
        let mut router = router();
        for seq in 1..=3 {
            router.handle_text(&chunk_json(seq, 4096, false)).unwrap();
        }

        let scheduled = router.player().device().scheduled();
        assert_eq!(scheduled.len(), 3);
        assert!((scheduled[0].start_at - 0.05).abs() < 1e-9);
        assert!((scheduled[2].start_at - (0.05 + 2.0 * 0.256)).abs() < 1e-9);
    }

    #[test]
    fn router_resets_once_per_explicit_stream() {
        let mut router = router();
        router
            .handle_text(r#"{"type":"llm_streaming_start","user_message":"hi"}"#)
            .unwrap();
        router
            .handle_text(r#"{"type":"tts_streaming_start"}"#)
            .unwrap();
        router.handle_text(&chunk_json(1, 160, false)).unwrap();
        router.handle_text(&chunk_json(2, 160, false)).unwrap();

        assert_eq!(router.player().stats().resets, 1);
        let summary = router.finish();
        assert_eq!(summary.streams, 1);
        assert_eq!(summary.audio_chunks, 2);
    }

    #[test]
    fn router_resets_when_numbering_restarts() {
        let mut router = router();
        router.handle_text(&chunk_json(1, 160, false)).unwrap();
        router.handle_text(&chunk_json(2, 160, false)).unwrap();
        router.handle_text(&chunk_json(1, 160, false)).unwrap();

        assert_eq!(router.player().stats().resets, 2);
        assert_eq!(router.finish().streams, 2);
    }

    #[test]
    fn router_plays_data_payload_of_every_audio_type() {
        for kind in ["audio", "audio_chunk", "tts_audio_chunk"] {
            let mut router = router();
            let json = format!(
                r#"{{"type":"{}","data":"{}","chunk_number":1}}"#,
                kind,
                pcm_b64(160)
            );
            router.handle_text(&json).unwrap();

            let summary = router.finish();
            assert_eq!(summary.invalid_messages, 0, "{}", kind);
            assert_eq!(summary.audio_chunks, 1, "{}", kind);
            assert_eq!(summary.playback.buffers_scheduled, 1, "{}", kind);
        }
    }

    #[test]
    fn router_resets_after_final_audio_chunk() {
        let mut router = router();
        let final_chunk = format!(
            r#"{{"type":"audio_chunk","data":"{}","chunk_number":1,"is_final":true}}"#,
            pcm_b64(160)
        );
        let next = format!(r#"{{"type":"audio_chunk","data":"{}"}}"#, pcm_b64(160));
        router.handle_text(&final_chunk).unwrap();
        router.handle_text(&next).unwrap();

        assert_eq!(router.player().stats().resets, 2);
        assert_eq!(router.finish().streams, 2);
    }

    #[test]
    fn router_sends_text_to_sink() {
        let mut router = router();
        router
            .handle_text(r#"{"type":"final_transcript","text":"what time is it"}"#)
            .unwrap();
        router
            .handle_text(r#"{"type":"llm_streaming_chunk","chunk":"Noon"}"#)
            .unwrap();
        router
            .handle_text(r#"{"type":"llm_streaming_complete"}"#)
            .unwrap();
        router
            .handle_text(r#"{"type":"llm_streaming_error","message":"quota"}"#)
            .unwrap();

        let sink = router.sink();
        assert_eq!(sink.transcripts, vec!["what time is it"]);
        assert_eq!(sink.replies, vec!["Noon"]);
        assert_eq!(sink.errors, vec!["llm: quota"]);
    }

    #[test]
    fn router_counts_and_skips_malformed_messages() {
        let mut router = router();
        assert_eq!(router.handle_text("{oops").unwrap(), RouterAction::None);
        router
            .handle_text(r#"{"type":"tts_audio_chunk","audio_base64":"!!"}"#)
            .unwrap();

        let summary = router.finish();
        assert_eq!(summary.invalid_messages, 1);
        assert_eq!(summary.playback.chunks_dropped, 1);
        assert_eq!(summary.playback.buffers_scheduled, 0);
    }

    #[test]
    fn router_ready_requests_streaming() {
        let mut router = router();
        let action = router
            .handle_text(r#"{"type":"audio_stream_ready","session_id":"s1"}"#)
            .unwrap();
        assert_eq!(action, RouterAction::StartStreaming);
    }

    #[test]
    fn summary_display_mentions_starvations() {
        let summary = SessionSummary::default();
        assert!(summary.to_string().contains("starvations:   0"));
    }

    #[tokio::test]
    async fn in_memory_channel_round_trip() {
        let (mut channel, mut server) = InMemoryChannel::pair();
        assert!(server.send_json(r#"{"type":"llm","text":"hi"}"#));
        channel.send_binary(vec![1, 2]).await.unwrap();

        assert_eq!(
            channel.recv().await.unwrap(),
            Some(Inbound::Text(r#"{"type":"llm","text":"hi"}"#.to_string()))
        );
        assert_eq!(server.drain(), vec![Outbound::Binary(vec![1, 2])]);

        channel.close().await.unwrap();
        assert!(channel.send_text("x").await.is_err());
        assert_eq!(channel.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn session_streams_after_ready_and_stops_on_shutdown() {
        let (channel, mut server) = InMemoryChannel::pair();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let device = MockOutputDevice::new().with_completion_sender(done_tx);
        let player = StreamPlayer::new(device, PlayerConfig::default());
        let mut session = Session::new(channel, player, CollectorSink::new(), done_rx);

        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let run = tokio::spawn(async move {
            let summary = session
                .run(Some(frame_rx), async {
                    let _ = stop_rx.await;
                })
                .await;
            (summary, session)
        });

        server.send_json(r#"{"type":"audio_stream_ready","session_id":"s1"}"#);
        tokio::time::sleep(Duration::from_millis(20)).await;
        frame_tx
            .send(CaptureFrame {
                sequence: 0,
                samples: vec![1, 2, 3],
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(()).unwrap();

        let (summary, _session) = run.await.unwrap();
        let summary = summary.unwrap();
        assert_eq!(summary.frames_sent, 1);
        assert_eq!(summary.bytes_sent, 6);

        let sent = server.drain();
        assert_eq!(
            sent,
            vec![
                Outbound::Text("start_streaming".to_string()),
                Outbound::Binary(vec![1, 0, 2, 0, 3, 0]),
                Outbound::Text("stop_streaming".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn session_holds_frames_until_ready() {
        let (channel, mut server) = InMemoryChannel::pair();
        let (_done_tx, done_rx) = mpsc::unbounded_channel();
        let player = StreamPlayer::new(MockOutputDevice::new(), PlayerConfig::default());
        let mut session = Session::new(channel, player, CollectorSink::new(), done_rx);

        let (frame_tx, frame_rx) = mpsc::channel(8);
        frame_tx
            .send(CaptureFrame {
                sequence: 0,
                samples: vec![7],
            })
            .await
            .unwrap();
        drop(frame_tx);

        let run = tokio::spawn(async move {
            let summary = session.run(Some(frame_rx), std::future::pending()).await;
            (summary, session)
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.drain().is_empty());

        server.send_json(r#"{"type":"audio_stream_ready"}"#);
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.disconnect();

        let (summary, _session) = run.await.unwrap();
        assert_eq!(summary.unwrap().frames_sent, 1);
        assert_eq!(
            server.drain(),
            vec![
                Outbound::Text("start_streaming".to_string()),
                Outbound::Binary(vec![7, 0]),
            ]
        );
    }

    #[tokio::test]
    async fn session_waits_for_scheduled_audio_after_server_closes() {
        let (channel, mut server) = InMemoryChannel::pair();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let device = MockOutputDevice::new().with_completion_sender(done_tx.clone());
        let player = StreamPlayer::new(
            device,
            PlayerConfig {
                sample_rate: 16000,
                ..PlayerConfig::default()
            },
        );
        let mut session = Session::new(channel, player, CollectorSink::new(), done_rx);

        server.send_json(&chunk_json(1, 1600, false));
        server.disconnect();

        // The mock clock never moves on its own; report the buffer finished
        // from outside, as a sound card would.
        let notifier = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = done_tx.send(1);
        });

        let summary = session.run(None, std::future::pending()).await.unwrap();
        notifier.await.unwrap();

        assert_eq!(summary.playback.buffers_scheduled, 1);
        assert_eq!(session.router().player().in_flight(), 0);
        assert_eq!(session.router().player().device().scheduled().len(), 1);
    }
}
