//! End-to-end session tests against a local mock speech server.

mod mock_providers;

use std::time::Duration;

use futures::StreamExt;

use mock_providers::speech_mock::{MockBehavior, SpeechMockServer};
use speechlink_gateway::core::error::StreamError;
use speechlink_gateway::core::session::SessionState;
use speechlink_gateway::core::stt::{RecognitionClient, RecognitionConfig};
use speechlink_gateway::core::tts::{SynthesisClient, SynthesisConfig};

fn recognition_client(url: &str) -> RecognitionClient {
    RecognitionClient::new(RecognitionConfig {
        url: url.to_string(),
        app_key: "test-app".to_string(),
        access_key: "test-access".to_string(),
        inbound_timeout: Duration::from_secs(2),
        grace_period: Duration::from_millis(300),
        ..Default::default()
    })
    .unwrap()
}

fn synthesis_client(url: &str) -> SynthesisClient {
    SynthesisClient::new(SynthesisConfig {
        url: url.to_string(),
        app_id: "test-app".to_string(),
        token: "test-token".to_string(),
        inbound_timeout: Duration::from_secs(2),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_recognition_three_segments_scenario() {
    let server = SpeechMockServer::start(MockBehavior::Recognize).await;
    let client = recognition_client(&server.url);

    let (handle, mut results) = client.start().await.unwrap();
    let request_id = handle.request_id().to_string();

    // 9600 bytes = three 3200-byte segments at 16 kHz / 16 bit / mono / 100 ms
    handle.push_audio(&vec![7u8; 9600]).unwrap();
    handle.finish();

    let mut texts = Vec::new();
    let mut finals = 0;
    while let Some(item) = results.next().await {
        let result = item.expect("session should succeed");
        if result.is_final {
            finals += 1;
        }
        texts.push(result.text().unwrap_or_default().to_string());
    }
    handle.join().await;

    assert_eq!(finals, 1);
    assert_eq!(texts.last().map(String::as_str), Some("word1 word2 word3"));
    assert_eq!(
        server.sequences(),
        vec![Some(1), Some(2), Some(3), Some(4), Some(-5)]
    );

    let frames = server.frames();
    // Handshake: full client request, JSON, gzip
    assert_eq!(frames[0].message_type, 0x1);
    assert_eq!(frames[0].flags, 1);
    assert_eq!(frames[0].serialization, 1);
    assert_eq!(frames[0].compression, 1);
    let handshake = frames[0].json();
    assert_eq!(handshake["audio"]["rate"], 16000);
    assert_eq!(handshake["request"]["model_name"], "bigmodel");

    for frame in &frames[1..4] {
        assert_eq!(frame.message_type, 0x2);
        assert_eq!(frame.flags, 1);
        assert_eq!(frame.payload.len(), 3200);
    }
    assert_eq!(frames[4].flags, 3);
    assert!(frames[4].payload.is_empty());

    assert_eq!(server.header("X-Api-App-Key").as_deref(), Some("test-app"));
    assert_eq!(
        server.header("X-Api-Connect-Id").as_deref(),
        Some(request_id.as_str())
    );
}

#[tokio::test]
async fn test_transcribe_returns_last_text() {
    let server = SpeechMockServer::start(MockBehavior::Recognize).await;
    let client = recognition_client(&server.url);

    // Two full segments and a 100-byte tail
    let transcript = client.transcribe(&vec![1u8; 6500]).await.unwrap();
    assert_eq!(transcript, "word1 word2 word3");

    let sequences = server.sequences();
    assert_eq!(sequences.first(), Some(&Some(1)));
    assert_eq!(sequences.last(), Some(&Some(-5)));
}

#[tokio::test]
async fn test_recognition_remote_error_is_reported_once() {
    let server = SpeechMockServer::start(MockBehavior::RejectAudio {
        code: 45000001,
        message: "invalid audio format".to_string(),
    })
    .await;
    let client = recognition_client(&server.url);

    let (handle, mut results) = client.start().await.unwrap();
    handle.push_audio(&vec![0u8; 3200]).unwrap();
    handle.finish();

    let mut errors = Vec::new();
    while let Some(item) = results.next().await {
        if let Err(e) = item {
            errors.push(e);
        }
    }

    assert_eq!(errors.len(), 1);
    match &errors[0] {
        StreamError::RemoteError { code, message } => {
            assert_eq!(*code, 45000001);
            assert_eq!(message, "invalid audio format");
        }
        other => panic!("expected RemoteError, got {other:?}"),
    }
    assert_eq!(handle.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_recognition_connection_lost() {
    let server = SpeechMockServer::start(MockBehavior::DropAfterHandshake).await;
    let client = recognition_client(&server.url);

    let (handle, mut results) = client.start().await.unwrap();
    handle.push_audio(&vec![0u8; 3200]).unwrap();

    let item = tokio::time::timeout(Duration::from_secs(5), results.next())
        .await
        .expect("session should end")
        .expect("one item");
    assert!(matches!(item, Err(StreamError::ConnectionLost(_))));
    assert!(results.next().await.is_none());
}

#[tokio::test]
async fn test_recognition_silent_server_times_out() {
    let server = SpeechMockServer::start(MockBehavior::Silent).await;
    let client = RecognitionClient::new(RecognitionConfig {
        url: server.url.clone(),
        inbound_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();

    let (_handle, mut results) = client.start().await.unwrap();
    let item = tokio::time::timeout(Duration::from_secs(5), results.next())
        .await
        .expect("timeout should fire")
        .expect("one item");
    assert!(matches!(item, Err(StreamError::Timeout(_))));
}

#[tokio::test]
async fn test_synthesis_streams_audio_chunks() {
    let chunks = vec![vec![1u8; 100], vec![2u8; 200], vec![3u8; 50]];
    let server = SpeechMockServer::start(MockBehavior::Synthesize {
        chunks: chunks.clone(),
    })
    .await;
    let client = synthesis_client(&server.url);

    let audio = client.synthesize_to_vec("hello there").await.unwrap();
    assert_eq!(audio, chunks.concat());

    let frames = server.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].message_type, 0x1);
    assert_eq!(frames[0].flags, 0);
    assert_eq!(frames[0].sequence, None);
    let submit = frames[0].json();
    assert_eq!(submit["request"]["text"], "hello there");
    assert_eq!(submit["request"]["operation"], "submit");
    assert_eq!(
        server.header("Authorization").as_deref(),
        Some("Bearer; test-token")
    );
}

#[tokio::test]
async fn test_synthesis_final_chunk_marked() {
    let server = SpeechMockServer::start(MockBehavior::Synthesize {
        chunks: vec![vec![9u8; 10], vec![8u8; 10]],
    })
    .await;
    let client = synthesis_client(&server.url);

    let mut results = client.synthesize("hi").await.unwrap();
    let mut flags = Vec::new();
    while let Some(item) = results.next().await {
        flags.push(item.unwrap().is_final);
    }
    assert_eq!(flags, vec![false, true]);
}
