//! Recognition relay WebSocket handler
//!
//! Bridges a browser or device client to a recognition session.
//!
//! # Protocol
//!
//! 1. The client sends one JSON text message, `{"audio_config": {...}}`.
//!    Fields present in `audio_config` (`format`, `codec`, `rate`, `bits`,
//!    `channel`) override the configured audio; the object may be empty or
//!    missing.
//! 2. The client then sends binary messages: one flag byte (`1` marks the
//!    last chunk) followed by audio bytes. Messages larger than the session
//!    buffer are fed in segment-sized pieces as the session drains.
//! 3. The server replies with `{"type":"result","text":..,"is_final":..}`
//!    messages and, on failure, a single `{"type":"error",..}` message.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::select;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::error::StreamError;
use crate::core::forwarder::SessionHandle;
use crate::core::stt::{SessionAudio, merge_audio_config};
use crate::state::AppState;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// How long the client has to send its audio configuration.
const CONFIG_TIMEOUT: Duration = Duration::from_secs(10);

/// Flag byte marking the client's last audio chunk.
const LAST_CHUNK_FLAG: u8 = 1;

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct AsrClientConfig {
    #[serde(default)]
    audio_config: Option<Value>,
}

/// Outgoing relay messages.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AsrOutgoingMessage {
    Result { text: String, is_final: bool },
    Error { code: String, message: String },
}

impl From<&StreamError> for AsrOutgoingMessage {
    fn from(err: &StreamError) -> Self {
        AsrOutgoingMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send_json(sender: &mut WsSender, message: &AsrOutgoingMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize outgoing message: {}", e);
            return true;
        }
    };
    match sender.send(Message::Text(json.into())).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to send WebSocket message: {}", e);
            false
        }
    }
}

// =============================================================================
// Handler
// =============================================================================

/// `GET /ws/asr`
pub async fn asr_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("Recognition WebSocket upgrade requested");
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_asr_socket(socket, state))
}

async fn handle_asr_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(recognition) = state.recognition.as_ref() else {
        let err = StreamError::Configuration("Recognition is not configured".to_string());
        send_json(&mut sender, &AsrOutgoingMessage::from(&err)).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    let audio = match tokio::time::timeout(
        CONFIG_TIMEOUT,
        read_audio_config(&mut receiver, recognition.config().session_audio()),
    )
    .await
    {
        Ok(Ok(audio)) => audio,
        Ok(Err(None)) => {
            info!("Client closed before sending audio configuration");
            return;
        }
        Ok(Err(Some(err))) => {
            send_json(&mut sender, &AsrOutgoingMessage::from(&err)).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
        Err(_) => {
            let err = StreamError::Timeout("No audio configuration received".to_string());
            send_json(&mut sender, &AsrOutgoingMessage::from(&err)).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let format = audio.format;
    let container = audio.container.clone();
    let (handle, mut results) = match recognition.start_with_audio(audio).await {
        Ok(session) => session,
        Err(err) => {
            error!("Failed to start recognition session: {}", err);
            send_json(&mut sender, &AsrOutgoingMessage::from(&err)).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!(
        request_id = %handle.request_id(),
        sample_rate = format.sample_rate,
        channels = format.channels,
        container = %container,
        "Recognition relay started"
    );

    let mut input = AudioInput::new(
        handle.segment_size().unwrap_or(MIN_PIECE_SIZE),
        Duration::from_millis(recognition.config().segment_duration_ms as u64),
    );

    loop {
        select! {
            item = results.next() => match item {
                Some(Ok(result)) => {
                    let message = AsrOutgoingMessage::Result {
                        text: result.text().unwrap_or_default().to_string(),
                        is_final: result.is_final,
                    };
                    if !send_json(&mut sender, &message).await {
                        handle.stop();
                        break;
                    }
                    // A consumed frame usually frees segmenter space.
                    input.pump(&handle);
                }
                Some(Err(err)) => {
                    warn!(request_id = %handle.request_id(), "Recognition session failed: {}", err);
                    send_json(&mut sender, &AsrOutgoingMessage::from(&err)).await;
                    break;
                }
                None => break,
            },
            _ = tokio::time::sleep_until(input.retry_at), if input.is_blocked() => {
                input.pump(&handle);
            }
            msg = receiver.next(), if input.accepts_messages() => match msg {
                Some(Ok(Message::Binary(data))) => input.enqueue(&handle, data),
                Some(Ok(Message::Text(text))) => {
                    debug!("Ignoring text message after configuration: {} bytes", text.len());
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(request_id = %handle.request_id(), "Client disconnected mid-session");
                    handle.stop();
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Recognition WebSocket error: {}", e);
                    handle.stop();
                    break;
                }
            },
        }
    }

    let request_id = handle.request_id().to_string();
    handle.join().await;
    let _ = sender.send(Message::Close(None)).await;
    info!(request_id = %request_id, "Recognition relay terminated");
}

/// Wait for the client's configuration message and merge it into `base`.
///
/// `Err(None)` means the client went away.
async fn read_audio_config<S>(
    receiver: &mut S,
    base: SessionAudio,
) -> Result<SessionAudio, Option<StreamError>>
where
    S: futures::Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                let config: AsrClientConfig = serde_json::from_str(&text).map_err(|e| {
                    Some(StreamError::Configuration(format!(
                        "Invalid audio configuration message: {e}"
                    )))
                })?;
                let audio = match config.audio_config {
                    Some(overrides) => merge_audio_config(base, &overrides).map_err(Some)?,
                    None => base,
                };
                audio.format.validate().map_err(Some)?;
                return Ok(audio);
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(Some(StreamError::Configuration(
                    "Expected audio configuration before audio".to_string(),
                )));
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return Err(None),
            Some(Ok(_)) => {}
        }
    }
}

// =============================================================================
// Audio input
// =============================================================================

/// Push size used when the session reports no segment size.
const MIN_PIECE_SIZE: usize = 320;

/// Audio from one client message that the session has not taken yet.
#[derive(Debug)]
struct PendingChunk {
    audio: Bytes,
    is_last: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum ChunkProgress {
    /// All audio accepted; `true` when it was the client's last chunk.
    Accepted(bool),
    /// Segmenter full; retry once it drains.
    Blocked,
    SessionOver,
}

impl PendingChunk {
    /// Split the flag byte off a client message. `None` for an empty message.
    fn parse(mut data: Bytes) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        let flag = data.split_to(1)[0];
        Some(Self {
            audio: data,
            is_last: flag == LAST_CHUNK_FLAG,
        })
    }

    /// Push as much audio as the session takes, `piece` bytes at a time.
    fn forward(&mut self, handle: &SessionHandle, piece: usize) -> ChunkProgress {
        while !self.audio.is_empty() {
            let take = self.audio.len().min(piece);
            match handle.push_audio(&self.audio[..take]) {
                Ok(()) => {
                    let _ = self.audio.split_to(take);
                }
                Err(StreamError::BufferOverflow { .. }) if !handle.is_done() => {
                    debug!(
                        request_id = %handle.request_id(),
                        remaining = self.audio.len(),
                        "Segmenter full, holding client audio"
                    );
                    return ChunkProgress::Blocked;
                }
                // The session is over; its result stream carries the reason.
                Err(_) => return ChunkProgress::SessionOver,
            }
        }

        if self.is_last {
            info!(request_id = %handle.request_id(), "Client sent last audio chunk");
            handle.finish();
        }
        ChunkProgress::Accepted(self.is_last)
    }
}

/// Client audio on its way into the session. While a chunk is pending no
/// further client messages are read.
struct AudioInput {
    pending: Option<PendingChunk>,
    open: bool,
    piece: usize,
    retry_delay: Duration,
    retry_at: Instant,
}

impl AudioInput {
    fn new(piece: usize, retry_delay: Duration) -> Self {
        Self {
            pending: None,
            open: true,
            piece: piece.max(1),
            retry_delay,
            retry_at: Instant::now(),
        }
    }

    fn accepts_messages(&self) -> bool {
        self.open && self.pending.is_none()
    }

    fn is_blocked(&self) -> bool {
        self.pending.is_some()
    }

    fn enqueue(&mut self, handle: &SessionHandle, data: Bytes) {
        self.pending = PendingChunk::parse(data);
        self.pump(handle);
    }

    /// Feed the pending chunk. A full segmenter schedules a retry.
    fn pump(&mut self, handle: &SessionHandle) {
        let Some(chunk) = self.pending.as_mut() else {
            return;
        };
        match chunk.forward(handle, self.piece) {
            ChunkProgress::Accepted(is_last) => {
                self.pending = None;
                self.open = !is_last;
            }
            ChunkProgress::Blocked => {
                self.retry_at = Instant::now() + self.retry_delay;
            }
            ChunkProgress::SessionOver => {
                self.pending = None;
                self.open = false;
            }
        }
    }
}
