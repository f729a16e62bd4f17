use std::io::Cursor;
use std::time::Duration;
use voxchat::playback::chunk::encode_base64;
use voxchat::playback::{
    AudioChunk, MockOutputDevice, PlaybackState, PlayerConfig, StreamPlayer,
    VirtualOutput, WavFileOutput,
};
use voxchat::replay::replay;
use voxchat::session::{EventRouter, InMemoryChannel, Outbound, Session};
use voxchat::{CollectorSink, HeaderPolicy};

const RATE: u32 = 16000;

fn pcm(samples: usize, value: i16) -> Vec<u8> {
    std::iter::repeat_n(value, samples)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// A complete WAV file (44-byte header + data), as TTS engines emit for the
/// first chunk of a response.
fn wav_bytes(samples: usize, value: i16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..samples {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn config() -> PlayerConfig {
    PlayerConfig {
        sample_rate: RATE,
        ..PlayerConfig::default()
    }
}

#[test]
fn header_is_stripped_only_from_first_chunk() {
    let mut player = StreamPlayer::new(MockOutputDevice::new(), config());

    let first = AudioChunk::new(encode_base64(&wav_bytes(800, 1000)));
    // Raw PCM that happens to start with "RIFF" must not lose bytes later on
    let mut tricky = b"RIFF".to_vec();
    tricky.extend(pcm(798, 0));
    let second = AudioChunk::new(encode_base64(&tricky));

    player.push_chunk(&first, true).unwrap();
    player.push_chunk(&second, false).unwrap();

    let scheduled = player.device().scheduled();
    assert_eq!(scheduled.len(), 2);
    assert_eq!(scheduled[0].samples.len(), 800);
    assert_eq!(scheduled[1].samples.len(), 800);
    assert!((scheduled[0].samples[0] - 1000.0 / 32768.0).abs() < 1e-6);
}

#[test]
fn header_policy_never_keeps_every_byte() {
    let mut player = StreamPlayer::new(
        MockOutputDevice::new(),
        PlayerConfig {
            header_policy: HeaderPolicy::Never,
            ..config()
        },
    );

    player.push_chunk(&AudioChunk::new(encode_base64(&wav_bytes(100, 1))), true).unwrap();

    // 44 header bytes decode as 22 extra samples
    assert_eq!(player.device().scheduled()[0].samples.len(), 122);
}

#[test]
fn bursty_arrival_plays_without_gaps() {
    let mut player = StreamPlayer::new(MockOutputDevice::new(), config());

    // Three chunks arrive at once, then two more while the first still plays
    for _ in 0..3 {
        player.push_chunk(&AudioChunk::new(encode_base64(&pcm(1600, 10))), false).unwrap();
    }
    player.device_mut().advance_to(0.12);
    for _ in 0..2 {
        player.push_chunk(&AudioChunk::new(encode_base64(&pcm(1600, 10))), false).unwrap();
    }

    let scheduled = player.device().scheduled();
    for pair in scheduled.windows(2) {
        assert!((pair[1].start_at - pair[0].end_at()).abs() < 1e-9);
    }
    assert_eq!(player.stats().starvations, 0);
    assert!((player.playhead().position() - 0.55).abs() < 1e-9);
}

#[test]
fn new_stream_interrupts_queued_audio_but_not_playing_audio() {
    let mut player = StreamPlayer::new(
        MockOutputDevice::new(),
        PlayerConfig {
            max_lookahead: Some(Duration::from_millis(150)),
            ..config()
        },
    );

    for _ in 0..4 {
        player.push_chunk(&AudioChunk::new(encode_base64(&pcm(1600, 10))), false).unwrap();
    }
    // The lookahead cap holds back part of the answer
    let committed = player.device().scheduled().len();
    assert!(committed < 4);
    assert!(player.queued() > 0);

    player.device_mut().advance_to(0.1);
    player.reset();
    assert_eq!(player.queued(), 0);

    player.push_chunk(&AudioChunk::new(encode_base64(&pcm(160, 20))), true).unwrap();
    let scheduled = player.device().scheduled();
    let last = scheduled.last().unwrap();
    assert!((last.start_at - 0.15).abs() < 1e-9);
    assert_eq!(scheduled.len(), committed + 1);
}

#[test]
fn device_failure_drops_rest_of_stream_until_reset() {
    let mut player = StreamPlayer::new(MockOutputDevice::new().with_failure_after(1), config());
    let chunk = AudioChunk::new(encode_base64(&pcm(160, 10)));

    assert!(player.push_chunk(&chunk, true).is_ok());
    assert!(player.push_chunk(&chunk, false).is_err());
    assert_eq!(player.state(), PlaybackState::Failed);
    assert_eq!(player.push_chunk(&chunk, false).unwrap(), 0);

    player.reset();
    assert_ne!(player.state(), PlaybackState::Failed);
    assert_eq!(player.stats().device_failures, 1);
}

#[test]
fn replayed_conversation_renders_to_wav() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = dir.path().join("answer.wav");
    let capture = [
        r#"{"type":"final_transcript","text":"tell me a joke"}"#.to_string(),
        r#"{"type":"llm_streaming_start","user_message":"tell me a joke"}"#.to_string(),
        format!(
            r#"{{"at":0.0,"message":{{"type":"tts_audio_chunk","audio_base64":"{}","chunk_number":1}}}}"#,
            encode_base64(&wav_bytes(1600, 300))
        ),
        format!(
            r#"{{"at":0.05,"message":{{"type":"tts_audio_chunk","audio_base64":"{}","chunk_number":2,"is_final":true}}}}"#,
            encode_base64(&pcm(1600, 300))
        ),
        r#"{"type":"llm","text":"Why did the chunk cross the socket?"}"#.to_string(),
    ]
    .join("\n");

    let device = WavFileOutput::new(&out, RATE);
    let mut router = EventRouter::new(StreamPlayer::new(device, config()), CollectorSink::new());
    let summary = replay(Cursor::new(capture), &mut router).unwrap();

    assert_eq!(summary.streams, 1);
    assert_eq!(summary.playback.starvations, 0);
    assert_eq!(summary.transcript.as_deref(), Some("tell me a joke"));
    assert_eq!(router.sink().replies.len(), 1);

    let mut reader = hound::WavReader::open(&out).unwrap();
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    // 50ms of lead-in silence, then 200ms of tone with no holes
    assert_eq!(samples.len(), 4000);
    assert!(samples[..800].iter().all(|&s| s == 0));
    assert!(samples[800..].iter().all(|&s| (s - 300).abs() <= 1));
}

#[tokio::test]
async fn scripted_backend_conversation() {
    let (channel, mut server) = InMemoryChannel::pair();
    let (done_tx, done_rx) = tokio::sync::mpsc::unbounded_channel();
    let device = MockOutputDevice::new().with_completion_sender(done_tx);
    let player = StreamPlayer::new(device, config());
    let mut session = Session::new(channel, player, CollectorSink::new(), done_rx);

    server.send_json(r#"{"type":"audio_stream_ready","session_id":"abc"}"#);
    server.send_json(r#"{"type":"partial_transcript","text":"what"}"#);
    server.send_json(r#"{"type":"final_transcript","text":"what time is it"}"#);
    server.send_json(r#"{"type":"llm_streaming_start","user_message":"what time is it"}"#);
    server.send_json(r#"{"type":"llm_streaming_chunk","chunk":"It is "}"#);
    server.send_json(r#"{"type":"llm_streaming_chunk","chunk":"noon."}"#);
    server.send_json(r#"{"type":"llm_streaming_complete"}"#);
    for seq in 1..=3 {
        server.send_json(&format!(
            r#"{{"type":"tts_audio_chunk","audio_base64":"{}","chunk_number":{},"is_final":{}}}"#,
            encode_base64(&pcm(160, 5)),
            seq,
            seq == 3
        ));
    }
    server.send_json(r#"{"type":"mystery_message"}"#);
    server.disconnect();

    // Nothing drives the mock clock, so the drain wait ends at its timeout
    let run = session.run(None, std::future::pending());
    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("session should end when the server hangs up")
        .unwrap();

    assert_eq!(summary.messages, 11);
    assert_eq!(summary.audio_chunks, 3);
    assert_eq!(summary.streams, 1);
    assert_eq!(summary.playback.buffers_scheduled, 3);
    assert_eq!(summary.playback.resets, 1);
    assert_eq!(summary.transcript.as_deref(), Some("what time is it"));

    let sink = session.router().sink();
    assert_eq!(sink.partials, 1);
    assert_eq!(sink.replies, vec!["It is noon."]);

    assert_eq!(
        server.drain(),
        vec![Outbound::Text("start_streaming".to_string())]
    );
}
