//! Chat backend client.
//!
//! The gateway forwards recognized text to a conversational backend and
//! speaks the answer. [`HttpChatBackend`] talks to a Dify-style
//! `/v1/chat-messages` endpoint in streaming mode.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat request failed: {0}")]
    Request(String),

    #[error("Chat backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid chat configuration: {0}")]
    Configuration(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Clone)]
pub struct ChatConfig {
    /// Full URL of the chat-messages endpoint.
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub query: String,
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatReply {
    pub answer: String,
    pub conversation_id: String,
    pub message_id: String,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `query` and wait for the complete answer.
    ///
    /// An empty or missing `conversation_id` starts a new conversation.
    async fn request(
        &self,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> ChatResult<ChatReply>;
}

pub struct HttpChatBackend {
    config: ChatConfig,
    client: reqwest::Client,
}

impl HttpChatBackend {
    pub fn new(config: ChatConfig) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn request(
        &self,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> ChatResult<ChatReply> {
        let body = json!({
            "inputs": {},
            "query": query,
            "response_mode": "streaming",
            "conversation_id": conversation_id.unwrap_or_default(),
            "user": user_id,
        });

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut reply = ChatReply::default();
        let mut pending = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ChatError::Request(e.to_string()))?;
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line = pending.split_to(pos + 1);
                apply_event_line(&mut reply, &line);
            }
        }
        // Final line without a trailing newline.
        if !pending.is_empty() {
            apply_event_line(&mut reply, &pending);
        }

        info!(
            user_id,
            conversation_id = %reply.conversation_id,
            message_id = %reply.message_id,
            answer_chars = reply.answer.chars().count(),
            "Chat reply received"
        );
        Ok(reply)
    }
}

/// Fold one `data: {...}` line of the event stream into `reply`.
///
/// Only `message` events carry answer text; anything unparsable is skipped.
fn apply_event_line(reply: &mut ChatReply, line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim().trim_start_matches("data:").trim();
    if payload.is_empty() {
        return;
    }

    let event: Value = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            debug!("Skipping unparsable chat event: {}", e);
            return;
        }
    };

    match event.get("event").and_then(Value::as_str) {
        Some("message") => {
            if let Some(answer) = event.get("answer").and_then(Value::as_str) {
                reply.answer.push_str(answer);
            }
            if let Some(id) = event.get("conversation_id").and_then(Value::as_str) {
                reply.conversation_id = id.to_string();
            }
            if let Some(id) = event.get("id").and_then(Value::as_str) {
                reply.message_id = id.to_string();
            }
        }
        Some("error") => {
            warn!(event = %payload, "Chat backend reported an error event");
        }
        _ => {}
    }
}
