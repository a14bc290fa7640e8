//! Classification of inbound frames into caller-visible results.

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::core::error::{StreamError, StreamResult};
use crate::core::protocol::payload::decompress;
use crate::core::protocol::{Frame, MessageType, Payload, SequenceFlag};
use crate::core::session::Direction;

/// Data carried by a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultContent {
    /// Recognized text.
    Text(String),
    /// Synthesized audio bytes.
    Audio(Bytes),
}

/// One item of a session's result stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechResult {
    pub content: ResultContent,
    /// Final results are the last item of the stream.
    pub is_final: bool,
    /// Sequence number of the frame the result came from, if it had one.
    pub sequence: Option<i32>,
}

impl SpeechResult {
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            ResultContent::Text(text) => Some(text),
            ResultContent::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&Bytes> {
        match &self.content {
            ResultContent::Audio(audio) => Some(audio),
            ResultContent::Text(_) => None,
        }
    }
}

/// What an inbound frame means to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Interim unit; more will follow.
    Partial(ResultContent),
    /// Terminal frame, with its unit if it carried one.
    Final(Option<ResultContent>),
    /// Non-terminal frame with nothing for the caller.
    Ack,
    /// Error frame from the server.
    Error { code: u32, message: String },
}

impl Classified {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Classified::Final(_) | Classified::Error { .. })
    }
}

/// Classify a decoded inbound frame.
pub fn classify(frame: &Frame, direction: Direction) -> StreamResult<Classified> {
    if let Some(details) = frame.error_details() {
        let (code, message) = details?;
        return Ok(Classified::Error { code, message });
    }

    let terminal = frame.is_terminal();
    let unit = match (direction, frame.message_type()) {
        (_, MessageType::FullClientRequest | MessageType::AudioOnlyRequest) => {
            return Err(StreamError::ProtocolError(format!(
                "Client message type {:?} received from server",
                frame.message_type()
            )));
        }
        (Direction::Recognition, MessageType::FullServerResponse) => {
            recognition_text(frame)?.map(ResultContent::Text)
        }
        (Direction::Synthesis, MessageType::AudioOnlyResponse) => {
            if frame.header.flags == SequenceFlag::None {
                None
            } else {
                let audio = decompress(frame.payload(), frame.header.compression)?;
                (!audio.is_empty()).then_some(ResultContent::Audio(audio))
            }
        }
        (_, MessageType::FrontendResponse) => {
            debug!(
                payload_len = frame.payload().len(),
                "Frontend response received"
            );
            None
        }
        (_, other) => {
            debug!(message_type = ?other, ?direction, "Frame carries no result for this direction");
            None
        }
    };

    Ok(match (terminal, unit) {
        (true, unit) => Classified::Final(unit),
        (false, Some(unit)) => Classified::Partial(unit),
        (false, None) => Classified::Ack,
    })
}

/// Extract `result.text` (or `result[0].text`) from a recognition response.
fn recognition_text(frame: &Frame) -> StreamResult<Option<String>> {
    let value = match frame.decoded_payload()? {
        Payload::Json(value) => value,
        Payload::Raw(raw) => {
            if raw.is_empty() {
                return Ok(None);
            }
            serde_json::from_slice::<Value>(&raw)
                .map_err(|e| StreamError::MalformedFrame(format!("Invalid JSON payload: {e}")))?
        }
    };

    let result = match value.get("result") {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };

    Ok(result
        .and_then(|r| r.get("text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string))
}
