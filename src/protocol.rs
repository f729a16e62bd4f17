//! JSON message protocol spoken with the voice-agent backend.
//!
//! Server → client messages are JSON text frames tagged by `type`. Several
//! backend generations are in the field, so the enum accepts each of their
//! vocabularies and [`ServerMessage::into_event`] narrows them to the handful
//! of things the client actually reacts to.
//!
//! Client → server traffic is binary frames of little-endian 16-bit PCM plus
//! the bare text commands in [`ClientCommand`].

use crate::error::{Result, VoxError};
use crate::playback::AudioChunk;
use serde::{Deserialize, Serialize};

/// Body shared by the three audio message types.
///
/// Backends disagree on the payload field name; `data` is canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    #[serde(alias = "audio_base64", alias = "audio", alias = "b64")]
    pub data: String,
    pub chunk_number: Option<u64>,
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub is_final: bool,
}

impl From<AudioPayload> for AudioChunk {
    fn from(payload: AudioPayload) -> Self {
        let mut chunk = AudioChunk::new(payload.data).with_final(payload.is_final);
        if let Some(seq) = payload.chunk_number {
            chunk = chunk.with_sequence(seq);
        }
        if let Some(size) = payload.chunk_size {
            chunk.byte_size = size;
        }
        chunk
    }
}

/// Messages sent by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Socket accepted; the client may start streaming microphone audio
    AudioStreamReady {
        session_id: Option<String>,
        #[serde(default)]
        transcription_enabled: bool,
    },
    ChunkAck {
        chunk_number: Option<u64>,
        chunk_size: Option<u64>,
    },
    CommandResponse {
        message: Option<String>,
    },
    TranscriptionReady {
        message: Option<String>,
    },
    TranscriptionStopped {
        message: Option<String>,
    },
    StreamingComplete {
        message: Option<String>,
        transcription: Option<String>,
    },

    PartialTranscript {
        #[serde(default)]
        text: String,
    },
    FinalTranscript {
        #[serde(default)]
        text: String,
    },
    Final {
        #[serde(default)]
        text: String,
    },
    Transcript {
        #[serde(default)]
        text: String,
    },
    TurnEnd {
        final_transcript: Option<String>,
    },
    TranscriptionComplete {
        text: Option<String>,
    },

    /// A new answer begins; any audio still queued belongs to the old one
    LlmStreamingStart {
        message: Option<String>,
        user_message: Option<String>,
    },
    LlmStreamingChunk {
        #[serde(default)]
        chunk: String,
        accumulated_length: Option<u64>,
    },
    LlmStreamingComplete {
        message: Option<String>,
    },
    Llm {
        #[serde(default)]
        text: String,
    },
    AiResponse {
        #[serde(default)]
        text: String,
    },

    TtsStreamingStart {
        message: Option<String>,
    },
    TtsStatus {
        data: Option<serde_json::Value>,
    },
    TtsAudioChunk(AudioPayload),
    AudioChunk(AudioPayload),
    Audio(AudioPayload),

    Error {
        message: Option<String>,
    },
    TranscriptionError {
        message: Option<String>,
    },
    LlmStreamingError {
        message: Option<String>,
    },
    TtsStreamingError {
        message: Option<String>,
    },

    /// Any `type` this client does not know
    #[serde(other)]
    Unknown,
}

/// What the session loop does in response to a server message.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Backend is ready for microphone audio.
    Ready { session_id: Option<String> },
    AudioChunk(AudioChunk),
    /// A new spoken answer starts.
    StreamStart { user_message: Option<String> },
    Transcript { text: String, is_final: bool },
    /// Agent reply text; `partial` chunks are appended to the current line.
    AgentText { text: String, partial: bool },
    /// Agent finished streaming its reply text.
    AgentDone,
    TurnEnded { transcript: Option<String> },
    ServerError { source: &'static str, message: String },
    Status { message: String },
    Ignored,
}

impl ServerMessage {
    /// Parse one JSON text frame.
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| VoxError::Protocol {
            message: format!("invalid server message: {}", e),
        })
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AudioStreamReady { .. } => "audio_stream_ready",
            Self::ChunkAck { .. } => "chunk_ack",
            Self::CommandResponse { .. } => "command_response",
            Self::TranscriptionReady { .. } => "transcription_ready",
            Self::TranscriptionStopped { .. } => "transcription_stopped",
            Self::StreamingComplete { .. } => "streaming_complete",
            Self::PartialTranscript { .. } => "partial_transcript",
            Self::FinalTranscript { .. } => "final_transcript",
            Self::Final { .. } => "final",
            Self::Transcript { .. } => "transcript",
            Self::TurnEnd { .. } => "turn_end",
            Self::TranscriptionComplete { .. } => "transcription_complete",
            Self::LlmStreamingStart { .. } => "llm_streaming_start",
            Self::LlmStreamingChunk { .. } => "llm_streaming_chunk",
            Self::LlmStreamingComplete { .. } => "llm_streaming_complete",
            Self::Llm { .. } => "llm",
            Self::AiResponse { .. } => "ai_response",
            Self::TtsStreamingStart { .. } => "tts_streaming_start",
            Self::TtsStatus { .. } => "tts_status",
            Self::TtsAudioChunk(_) => "tts_audio_chunk",
            Self::AudioChunk(_) => "audio_chunk",
            Self::Audio(_) => "audio",
            Self::Error { .. } => "error",
            Self::TranscriptionError { .. } => "transcription_error",
            Self::LlmStreamingError { .. } => "llm_streaming_error",
            Self::TtsStreamingError { .. } => "tts_streaming_error",
            Self::Unknown => "unknown",
        }
    }

    pub fn into_event(self) -> SessionEvent {
        match self {
            Self::AudioStreamReady { session_id, .. } => SessionEvent::Ready { session_id },

            Self::TtsAudioChunk(payload) | Self::AudioChunk(payload) | Self::Audio(payload) => {
                SessionEvent::AudioChunk(payload.into())
            }

            Self::LlmStreamingStart { user_message, .. } => {
                SessionEvent::StreamStart { user_message }
            }
            Self::TtsStreamingStart { .. } => SessionEvent::StreamStart { user_message: None },

            Self::PartialTranscript { text } => transcript(text, false),
            Self::FinalTranscript { text } | Self::Final { text } | Self::Transcript { text } => {
                transcript(text, true)
            }
            Self::TranscriptionComplete { text } => transcript(text.unwrap_or_default(), true),
            Self::TurnEnd { final_transcript } => SessionEvent::TurnEnded {
                transcript: final_transcript.filter(|t| !t.trim().is_empty()),
            },

            Self::LlmStreamingChunk { chunk, .. } => SessionEvent::AgentText {
                text: chunk,
                partial: true,
            },
            Self::Llm { text } | Self::AiResponse { text } => SessionEvent::AgentText {
                text,
                partial: false,
            },
            Self::LlmStreamingComplete { .. } => SessionEvent::AgentDone,

            Self::Error { message } => server_error("server", message),
            Self::TranscriptionError { message } => server_error("transcription", message),
            Self::LlmStreamingError { message } => server_error("llm", message),
            Self::TtsStreamingError { message } => server_error("tts", message),

            Self::CommandResponse { message }
            | Self::TranscriptionReady { message }
            | Self::TranscriptionStopped { message }
            | Self::StreamingComplete { message, .. } => match message {
                Some(message) if !message.trim().is_empty() => SessionEvent::Status { message },
                _ => SessionEvent::Ignored,
            },
            Self::TtsStatus { data } => match data {
                Some(data) => SessionEvent::Status {
                    message: format!("tts: {}", data),
                },
                None => SessionEvent::Ignored,
            },

            Self::ChunkAck { .. } | Self::Unknown => SessionEvent::Ignored,
        }
    }
}

fn transcript(text: String, is_final: bool) -> SessionEvent {
    if text.trim().is_empty() {
        SessionEvent::Ignored
    } else {
        SessionEvent::Transcript { text, is_final }
    }
}

fn server_error(source: &'static str, message: Option<String>) -> SessionEvent {
    SessionEvent::ServerError {
        source,
        message: message.unwrap_or_else(|| "unspecified error".to_string()),
    }
}

/// Text commands sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// Begin streaming microphone audio for transcription
    StartStreaming,
    /// Stop streaming; the backend finalizes the transcript
    StopStreaming,
    /// End of a finite audio input
    EndOfAudio,
}

impl ClientCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartStreaming => "start_streaming",
            Self::StopStreaming => "stop_streaming",
            Self::EndOfAudio => "EOF",
        }
    }
}

impl std::fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> SessionEvent {
        ServerMessage::from_json(json)
            .expect("should parse")
            .into_event()
    }

    #[test]
    fn test_tts_audio_chunk_carries_metadata() {
        let msg = ServerMessage::from_json(
            r#"{"type":"tts_audio_chunk","audio_base64":"AAAA","chunk_number":3,"chunk_size":4,"is_final":true}"#,
        )
        .unwrap();
        assert_eq!(msg.kind(), "tts_audio_chunk");

        match msg.into_event() {
            SessionEvent::AudioChunk(chunk) => {
                assert_eq!(chunk.data, "AAAA");
                assert_eq!(chunk.sequence, Some(3));
                assert_eq!(chunk.byte_size, 4);
                assert!(chunk.is_final);
            }
            other => panic!("Expected AudioChunk, got {:?}", other),
        }
    }

    #[test]
    fn test_audio_payload_field_aliases() {
        for json in [
            r#"{"type":"audio","b64":"AQID"}"#,
            r#"{"type":"audio_chunk","audio":"AQID"}"#,
            r#"{"type":"tts_audio_chunk","data":"AQID"}"#,
            r#"{"type":"tts_audio_chunk","audio":"AQID"}"#,
        ] {
            match event(json) {
                SessionEvent::AudioChunk(chunk) => assert_eq!(chunk.data, "AQID", "{}", json),
                other => panic!("Expected AudioChunk for {}, got {:?}", json, other),
            }
        }
    }

    #[test]
    fn test_every_audio_type_accepts_data_with_metadata() {
        for kind in ["audio", "audio_chunk", "tts_audio_chunk"] {
            let json = format!(
                r#"{{"type":"{}","data":"AQID","chunk_number":7,"chunk_size":3,"is_final":true}}"#,
                kind
            );
            let msg = ServerMessage::from_json(&json).expect("should parse");
            assert_eq!(msg.kind(), kind);

            match msg.into_event() {
                SessionEvent::AudioChunk(chunk) => {
                    assert_eq!(chunk.data, "AQID", "{}", kind);
                    assert_eq!(chunk.sequence, Some(7), "{}", kind);
                    assert_eq!(chunk.byte_size, 3, "{}", kind);
                    assert!(chunk.is_final, "{}", kind);
                }
                other => panic!("Expected AudioChunk for {}, got {:?}", kind, other),
            }
        }
    }

    #[test]
    fn test_audio_metadata_is_optional() {
        match event(r#"{"type":"audio","data":"AQID"}"#) {
            SessionEvent::AudioChunk(chunk) => {
                assert_eq!(chunk.sequence, None);
                assert!(!chunk.is_final);
            }
            other => panic!("Expected AudioChunk, got {:?}", other),
        }
    }

    #[test]
    fn test_audio_without_payload_is_rejected() {
        assert!(ServerMessage::from_json(r#"{"type":"tts_audio_chunk","chunk_number":1}"#).is_err());
    }

    #[test]
    fn test_stream_start_messages() {
        assert_eq!(
            event(r#"{"type":"llm_streaming_start","message":"thinking","user_message":"hi"}"#),
            SessionEvent::StreamStart {
                user_message: Some("hi".to_string())
            }
        );
        assert_eq!(
            event(r#"{"type":"tts_streaming_start"}"#),
            SessionEvent::StreamStart { user_message: None }
        );
    }

    #[test]
    fn test_transcript_variants() {
        assert_eq!(
            event(r#"{"type":"partial_transcript","text":"hel"}"#),
            SessionEvent::Transcript {
                text: "hel".to_string(),
                is_final: false
            }
        );
        for kind in ["final_transcript", "final", "transcript", "transcription_complete"] {
            let json = format!(r#"{{"type":"{}","text":"hello"}}"#, kind);
            assert_eq!(
                event(&json),
                SessionEvent::Transcript {
                    text: "hello".to_string(),
                    is_final: true
                },
                "{}",
                kind
            );
        }
    }

    #[test]
    fn test_blank_transcripts_are_ignored() {
        assert_eq!(
            event(r#"{"type":"final_transcript","text":"  "}"#),
            SessionEvent::Ignored
        );
        assert_eq!(
            event(r#"{"type":"transcription_complete"}"#),
            SessionEvent::Ignored
        );
    }

    #[test]
    fn test_turn_end() {
        assert_eq!(
            event(r#"{"type":"turn_end","final_transcript":"what time is it"}"#),
            SessionEvent::TurnEnded {
                transcript: Some("what time is it".to_string())
            }
        );
        assert_eq!(
            event(r#"{"type":"turn_end","final_transcript":""}"#),
            SessionEvent::TurnEnded { transcript: None }
        );
    }

    #[test]
    fn test_agent_text() {
        assert_eq!(
            event(r#"{"type":"llm_streaming_chunk","chunk":"It is ","accumulated_length":6}"#),
            SessionEvent::AgentText {
                text: "It is ".to_string(),
                partial: true
            }
        );
        assert_eq!(
            event(r#"{"type":"ai_response","text":"Noon."}"#),
            SessionEvent::AgentText {
                text: "Noon.".to_string(),
                partial: false
            }
        );
        assert_eq!(
            event(r#"{"type":"llm_streaming_complete","message":"done"}"#),
            SessionEvent::AgentDone
        );
    }

    #[test]
    fn test_errors_name_their_source() {
        assert_eq!(
            event(r#"{"type":"tts_streaming_error","message":"voice offline"}"#),
            SessionEvent::ServerError {
                source: "tts",
                message: "voice offline".to_string()
            }
        );
        assert_eq!(
            event(r#"{"type":"error"}"#),
            SessionEvent::ServerError {
                source: "server",
                message: "unspecified error".to_string()
            }
        );
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(
            event(r#"{"type":"command_response","message":"Streaming started"}"#),
            SessionEvent::Status {
                message: "Streaming started".to_string()
            }
        );
        assert_eq!(
            event(r#"{"type":"chunk_ack","chunk_number":1,"chunk_size":8192}"#),
            SessionEvent::Ignored
        );
        assert!(matches!(
            event(r#"{"type":"tts_status","data":{"queued":2}}"#),
            SessionEvent::Status { .. }
        ));
    }

    #[test]
    fn test_ready_carries_session_id() {
        assert_eq!(
            event(r#"{"type":"audio_stream_ready","session_id":"abc","transcription_enabled":true}"#),
            SessionEvent::Ready {
                session_id: Some("abc".to_string())
            }
        );
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let msg = ServerMessage::from_json(r#"{"type":"heartbeat","ts":1}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
        assert_eq!(msg.into_event(), SessionEvent::Ignored);
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        match ServerMessage::from_json("not json") {
            Err(VoxError::Protocol { message }) => {
                assert!(message.contains("invalid server message"))
            }
            other => panic!("Expected Protocol error, got {:?}", other),
        }
        assert!(ServerMessage::from_json(r#"{"text":"no type"}"#).is_err());
    }

    #[test]
    fn test_json_format_is_snake_case() {
        let json = ServerMessage::TtsStreamingStart { message: None }
            .to_json()
            .expect("should serialize");
        assert!(json.contains("\"type\":\"tts_streaming_start\""), "{}", json);
    }

    #[test]
    fn test_client_commands() {
        assert_eq!(ClientCommand::StartStreaming.as_str(), "start_streaming");
        assert_eq!(ClientCommand::StopStreaming.to_string(), "stop_streaming");
        assert_eq!(ClientCommand::EndOfAudio.as_str(), "EOF");
    }
}
