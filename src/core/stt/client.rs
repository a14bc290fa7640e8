//! Recognition client: builds the handshake, connects and hands the socket
//! to a [`DuplexForwarder`].

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::config::{RecognitionConfig, SessionAudio};
use super::messages::{AudioMeta, RecognitionRequest, RequestMeta, UserMeta};
use crate::core::error::{StreamError, StreamResult};
use crate::core::forwarder::{DuplexForwarder, ResultStream, SessionHandle, SessionInput};
use crate::core::segmenter::{AudioFormat, AudioSegmenter};
use crate::core::session::{Direction, SessionStateMachine};
use crate::core::transport::connect;

pub struct RecognitionClient {
    config: RecognitionConfig,
}

impl RecognitionClient {
    pub fn new(config: RecognitionConfig) -> StreamResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    /// Handshake payload for a session carrying `audio`.
    pub fn handshake(&self, audio: &SessionAudio) -> RecognitionRequest {
        RecognitionRequest {
            user: UserMeta {
                uid: self.config.uid.clone(),
            },
            audio: AudioMeta::from(audio),
            request: RequestMeta {
                model_name: self.config.model_name.clone(),
                enable_punc: self.config.enable_punc,
                enable_itn: self.config.enable_itn,
                enable_ddc: self.config.enable_ddc,
            },
        }
    }

    /// Upgrade headers. The request id doubles as the connect id.
    pub fn headers(&self, request_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("X-Api-App-Key", self.config.app_key.clone()),
            ("X-Api-Access-Key", self.config.access_key.clone()),
            ("X-Api-Resource-Id", self.config.resource_id.clone()),
            ("X-Api-Request-Id", request_id.to_string()),
            ("X-Api-Connect-Id", request_id.to_string()),
        ]
    }

    /// Open a session with the configured audio.
    pub async fn start(&self) -> StreamResult<(SessionHandle, ResultStream)> {
        self.start_with_audio(self.config.session_audio()).await
    }

    /// Open a session for `audio`.
    pub async fn start_with_audio(
        &self,
        audio: SessionAudio,
    ) -> StreamResult<(SessionHandle, ResultStream)> {
        let format = audio.format;
        let segmenter = Arc::new(AudioSegmenter::new(&self.config.segmenter_config(format))?);
        let handshake = serde_json::to_value(self.handshake(&audio)).map_err(|e| {
            StreamError::Configuration(format!("Failed to build recognition handshake: {e}"))
        })?;

        let request_id = Uuid::new_v4().to_string();
        let headers = self.headers(&request_id);
        let connection = connect(&self.config.url, &headers, self.config.connect_timeout).await?;
        info!(
            request_id = %request_id,
            log_id = connection.log_id.as_deref().unwrap_or("-"),
            sample_rate = format.sample_rate,
            container = %audio.container,
            segment_size = segmenter.segment_size(),
            "Recognition session connected"
        );

        Ok(DuplexForwarder::spawn(
            SessionStateMachine::new(Direction::Recognition, request_id),
            handshake,
            connection.sink,
            connection.source,
            SessionInput::Audio(segmenter),
            self.config.forwarder_config(),
        ))
    }

    /// Recognize a complete buffer of PCM audio and return the final text.
    ///
    /// Results are cumulative, so the last text received is the transcript.
    pub async fn transcribe(&self, audio: &[u8]) -> StreamResult<String> {
        let (handle, results) = self.start().await?;
        let chunk = handle
            .segment_size()
            .ok_or_else(|| StreamError::ProtocolError("Session has no segmenter".to_string()))?;

        let feeder = async {
            for piece in audio.chunks(chunk) {
                loop {
                    match handle.push_audio(piece) {
                        Ok(()) => break,
                        Err(StreamError::BufferOverflow { .. }) => {
                            tokio::time::sleep(std::time::Duration::from_millis(
                                self.config.segment_duration_ms as u64,
                            ))
                            .await;
                        }
                        // Session already over; results carry the reason.
                        Err(_) => return,
                    }
                }
            }
            handle.finish();
        };

        let collector = collect_transcript(results);
        let ((), transcript) = tokio::join!(feeder, collector);
        transcript
    }
}

async fn collect_transcript(mut results: ResultStream) -> StreamResult<String> {
    let mut transcript = String::new();
    while let Some(item) = results.next().await {
        let result = item?;
        if let Some(text) = result.text() {
            debug!(is_final = result.is_final, text, "Recognition result");
            transcript = text.to_string();
        }
    }
    Ok(transcript)
}

/// Apply the fields of a caller-supplied `audio_config` object on top of
/// `audio`. Missing or null fields keep their current value; unknown fields
/// are ignored.
///
/// # Errors
/// `Configuration` when `overrides` is not an object, a numeric field is not
/// an integer that fits its type, or `format`/`codec` is not a string.
pub fn merge_audio_config(audio: SessionAudio, overrides: &Value) -> StreamResult<SessionAudio> {
    if !overrides.is_object() {
        return Err(StreamError::Configuration(
            "audio_config must be a JSON object".to_string(),
        ));
    }
    let format = audio.format;

    let sample_rate = integer_field::<u32>(overrides, &["rate", "sample_rate"])?;
    let bits = integer_field::<u16>(overrides, &["bits"])?;
    let channels = integer_field::<u16>(overrides, &["channel", "channels"])?;

    let container = match text_field(overrides, "format")? {
        Some(container) => container,
        None => audio.container,
    };
    let codec = match text_field(overrides, "codec")? {
        Some(codec) => Some(codec),
        None => audio.codec,
    };

    Ok(SessionAudio {
        format: AudioFormat {
            sample_rate: sample_rate.unwrap_or(format.sample_rate),
            bits: bits.unwrap_or(format.bits),
            channels: channels.unwrap_or(format.channels),
        },
        container,
        codec,
    })
}

/// First non-null field among `names`, as an integer of type `T`.
fn integer_field<T: TryFrom<u64>>(overrides: &Value, names: &[&str]) -> StreamResult<Option<T>> {
    let Some((name, value)) = names.iter().find_map(|name| {
        overrides
            .get(*name)
            .filter(|v| !v.is_null())
            .map(|v| (*name, v))
    }) else {
        return Ok(None);
    };
    value
        .as_u64()
        .and_then(|v| T::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| {
            StreamError::Configuration(format!("audio_config.{name} is out of range: {value}"))
        })
}

fn text_field(overrides: &Value, name: &str) -> StreamResult<Option<String>> {
    match overrides.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if !text.is_empty() => Ok(Some(text.clone())),
        Some(other) => Err(StreamError::Configuration(format!(
            "audio_config.{name} must be a non-empty string, got {other}"
        ))),
    }
}
