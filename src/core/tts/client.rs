//! Synthesis client.
//!
//! One session per text: the text travels in the submit frame and the server
//! streams audio-only frames back until one carries a negative sequence.

use bytes::BytesMut;
use futures::StreamExt;
use tracing::info;
use uuid::Uuid;

use super::config::SynthesisConfig;
use super::messages::{
    AppMeta, Operation, SynthesisAudio, SynthesisRequest, SynthesisRequestMeta, SynthesisUser,
    TextType,
};
use crate::core::error::{StreamError, StreamResult};
use crate::core::forwarder::{DuplexForwarder, ResultStream, SessionInput};
use crate::core::session::{Direction, SessionStateMachine};
use crate::core::transport::connect;

pub struct SynthesisClient {
    config: SynthesisConfig,
}

impl SynthesisClient {
    pub fn new(config: SynthesisConfig) -> StreamResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Submit payload for `text`.
    pub fn handshake(&self, text: &str, request_id: &str) -> SynthesisRequest {
        SynthesisRequest {
            app: AppMeta {
                appid: self.config.app_id.clone(),
                token: self.config.token.clone(),
                cluster: self.config.cluster.clone(),
            },
            user: SynthesisUser {
                uid: self.config.uid.clone(),
            },
            audio: SynthesisAudio {
                voice_type: self.config.voice_type.clone(),
                encoding: self.config.encoding.clone(),
                speed_ratio: self.config.speed_ratio,
                volume_ratio: self.config.volume_ratio,
                pitch_ratio: self.config.pitch_ratio,
            },
            request: SynthesisRequestMeta {
                reqid: request_id.to_string(),
                text: text.to_string(),
                text_type: TextType::Plain,
                operation: Operation::Submit,
            },
        }
    }

    /// The service expects `Bearer;` followed by the token.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![("Authorization", format!("Bearer; {}", self.config.token))]
    }

    /// Stream synthesized audio for `text`.
    pub async fn synthesize(&self, text: &str) -> StreamResult<ResultStream> {
        if text.trim().is_empty() {
            return Err(StreamError::Configuration(
                "Text to synthesize must not be empty".to_string(),
            ));
        }

        let request_id = Uuid::new_v4().to_string();
        let handshake = serde_json::to_value(self.handshake(text, &request_id)).map_err(|e| {
            StreamError::Configuration(format!("Failed to build synthesis request: {e}"))
        })?;

        let connection = connect(
            &self.config.url,
            &self.headers(),
            self.config.connect_timeout,
        )
        .await?;
        info!(
            request_id = %request_id,
            log_id = connection.log_id.as_deref().unwrap_or("-"),
            chars = text.chars().count(),
            voice_type = %self.config.voice_type,
            "Synthesis session connected"
        );

        let (_handle, results) = DuplexForwarder::spawn(
            SessionStateMachine::new(Direction::Synthesis, request_id),
            handshake,
            connection.sink,
            connection.source,
            SessionInput::Text,
            self.config.forwarder_config(),
        );
        Ok(results)
    }

    /// Synthesize `text` and return the complete audio.
    pub async fn synthesize_to_vec(&self, text: &str) -> StreamResult<Vec<u8>> {
        let mut results = self.synthesize(text).await?;
        let mut audio = BytesMut::new();
        while let Some(item) = results.next().await {
            if let Some(chunk) = item?.audio() {
                audio.extend_from_slice(chunk);
            }
        }
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SynthesisClient {
        SynthesisClient::new(SynthesisConfig {
            app_id: "app".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_submit_payload_shape() {
        let value = serde_json::to_value(client().handshake("hello", "req-1")).unwrap();
        assert_eq!(value["app"]["appid"], "app");
        assert_eq!(value["app"]["cluster"], "volcano_tts");
        assert_eq!(value["audio"]["encoding"], "mp3");
        assert_eq!(value["request"]["text"], "hello");
        assert_eq!(value["request"]["text_type"], "plain");
        assert_eq!(value["request"]["operation"], "submit");
        assert_eq!(value["request"]["reqid"], "req-1");
    }

    #[test]
    fn test_authorization_header() {
        assert_eq!(
            client().headers(),
            vec![("Authorization", "Bearer; tok".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_text_rejected_before_connecting() {
        let result = client().synthesize("   ").await;
        assert!(matches!(result, Err(StreamError::Configuration(_))));
    }
}
