//! WebSocket mock server for the recognition and synthesis services

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

pub const MOCK_LOG_ID: &str = "mock-log-id-0001";

const FULL_SERVER_RESPONSE: u8 = 0x9;
const AUDIO_ONLY_RESPONSE: u8 = 0xb;
const ERROR_RESPONSE: u8 = 0xf;

/// How the mock answers a session.
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Acknowledge the handshake, then answer every audio frame with the
    /// cumulative transcript `word1 word2 ...`.
    Recognize,
    /// Acknowledge the handshake, then answer the first audio frame with an
    /// error frame whose message is gzip compressed.
    RejectAudio { code: u32, message: String },
    /// Acknowledge the handshake, then close without a terminal frame.
    DropAfterHandshake,
    /// Never answer anything.
    Silent,
    /// Answer the submit frame with these audio chunks; the last one carries
    /// a negative sequence.
    Synthesize { chunks: Vec<Vec<u8>> },
}

/// A frame received from the client, payload already gunzipped.
#[derive(Clone, Debug)]
pub struct ClientFrame {
    pub message_type: u8,
    pub flags: u8,
    pub serialization: u8,
    pub compression: u8,
    pub sequence: Option<i32>,
    pub payload: Vec<u8>,
}

impl ClientFrame {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

/// Running mock server. One session per accepted connection.
pub struct SpeechMockServer {
    pub url: String,
    pub frames: Arc<Mutex<Vec<ClientFrame>>>,
    pub headers: Arc<Mutex<Vec<(String, String)>>>,
}

impl SpeechMockServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let headers = Arc::new(Mutex::new(Vec::new()));

        let (task_frames, task_headers) = (frames.clone(), headers.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let behavior = behavior.clone();
                let frames = task_frames.clone();
                let headers = task_headers.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, behavior, frames, headers).await;
                });
            }
        });

        Self {
            url: format!("ws://{addr}"),
            frames,
            headers,
        }
    }

    pub fn frames(&self) -> Vec<ClientFrame> {
        self.frames.lock().clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// Sequence numbers of every client frame, `None` where absent.
    pub fn sequences(&self) -> Vec<Option<i32>> {
        self.frames().iter().map(|f| f.sequence).collect()
    }
}

async fn handle_connection(
    stream: TcpStream,
    behavior: MockBehavior,
    frames: Arc<Mutex<Vec<ClientFrame>>>,
    headers: Arc<Mutex<Vec<(String, String)>>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let mut captured = headers.lock();
        for (name, value) in request.headers() {
            captured.push((
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            ));
        }
        response
            .headers_mut()
            .insert("x-tt-logid", MOCK_LOG_ID.parse().unwrap());
        Ok(response)
    };
    let ws_stream = accept_hdr_async(stream, callback).await?;
    let (mut write, mut read) = ws_stream.split();

    let mut words = Vec::new();
    while let Some(msg) = read.next().await {
        let data = match msg? {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame = parse_client_frame(&data);
        frames.lock().push(frame.clone());

        if matches!(behavior, MockBehavior::Silent) {
            continue;
        }

        // Handshake
        if frame.message_type == 0x1 {
            match &behavior {
                MockBehavior::Synthesize { chunks } => {
                    let last = chunks.len() as i32;
                    for (i, chunk) in chunks.iter().enumerate() {
                        let seq = i as i32 + 1;
                        let (flags, seq) = if seq == last { (3, -seq) } else { (1, seq) };
                        write
                            .send(Message::Binary(
                                server_frame(AUDIO_ONLY_RESPONSE, flags, 0, 0, Some(seq), chunk)
                                    .into(),
                            ))
                            .await?;
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    break;
                }
                MockBehavior::DropAfterHandshake => {
                    send_json(&mut write, 1, Some(1), &json!({"result": {"text": ""}})).await?;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    break;
                }
                _ => {
                    send_json(&mut write, 1, Some(1), &json!({"result": {"text": ""}})).await?;
                }
            }
            continue;
        }

        // Audio
        let seq = frame.sequence.unwrap_or(0);
        match &behavior {
            MockBehavior::RejectAudio { code, message } => {
                write
                    .send(Message::Binary(error_frame(*code, message).into()))
                    .await?;
                break;
            }
            _ => {
                if !frame.payload.is_empty() {
                    words.push(format!("word{}", words.len() + 1));
                }
                let text = words.join(" ");
                if seq < 0 {
                    let body = json!({"result": [{"text": text, "utterances": []}]});
                    send_json(&mut write, 3, Some(seq), &body).await?;
                    break;
                }
                send_json(&mut write, 1, Some(seq), &json!({"result": {"text": text}})).await?;
            }
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}

async fn send_json<S>(
    write: &mut S,
    flags: u8,
    sequence: Option<i32>,
    body: &Value,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let payload = gzip(body.to_string().as_bytes());
    let frame = server_frame(FULL_SERVER_RESPONSE, flags, 1, 1, sequence, &payload);
    write.send(Message::Binary(frame.into())).await?;
    Ok(())
}

// =============================================================================
// Raw frame helpers
// =============================================================================

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

/// Build a one-word-header server frame.
pub fn server_frame(
    message_type: u8,
    flags: u8,
    serialization: u8,
    compression: u8,
    sequence: Option<i32>,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = vec![
        0x11,
        (message_type << 4) | flags,
        (serialization << 4) | compression,
        0x00,
    ];
    if let Some(seq) = sequence {
        out.extend_from_slice(&seq.to_be_bytes());
    }
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Error frame with a gzip-compressed message.
pub fn error_frame(code: u32, message: &str) -> Vec<u8> {
    let body = gzip(message.as_bytes());
    let mut out = vec![0x11, ERROR_RESPONSE << 4, 0x11, 0x00];
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

pub fn parse_client_frame(data: &[u8]) -> ClientFrame {
    let header_len = (data[0] & 0x0f) as usize * 4;
    let message_type = data[1] >> 4;
    let flags = data[1] & 0x0f;
    let serialization = data[2] >> 4;
    let compression = data[2] & 0x0f;

    let mut pos = header_len;
    let sequence = if flags != 0 {
        let seq = i32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        Some(seq)
    } else {
        None
    };
    let len = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;
    let raw = &data[pos..pos + len];
    assert_eq!(pos + len, data.len(), "client frame has trailing bytes");

    let payload = if compression == 1 && !raw.is_empty() {
        gunzip(raw)
    } else {
        raw.to_vec()
    };

    ClientFrame {
        message_type,
        flags,
        serialization,
        compression,
        sequence,
        payload,
    }
}
