use std::sync::Arc;

use tracing::{info, warn};

use crate::chat::{ChatBackend, HttpChatBackend};
use crate::config::ServerConfig;
use crate::core::error::StreamResult;
use crate::core::stt::RecognitionClient;
use crate::core::tts::SynthesisClient;

/// Shared application state for HTTP and WebSocket handlers
pub struct AppState {
    pub config: ServerConfig,
    /// `None` when recognition credentials are missing.
    pub recognition: Option<RecognitionClient>,
    /// `None` when synthesis credentials are missing.
    pub synthesis: Option<SynthesisClient>,
    pub chat: Arc<dyn ChatBackend>,
}

impl AppState {
    /// Build the clients described by `config`.
    pub fn new(config: ServerConfig) -> StreamResult<Arc<Self>> {
        let recognition = if config.has_recognition_credentials() {
            Some(RecognitionClient::new(config.recognition_config())?)
        } else {
            warn!("ASR_APP_KEY/ASR_ACCESS_KEY not set; /ws/asr is disabled");
            None
        };

        let synthesis = if config.has_synthesis_credentials() {
            Some(SynthesisClient::new(config.synthesis_config())?)
        } else {
            warn!("TTS_APP_ID/TTS_TOKEN not set; speech synthesis is disabled");
            None
        };

        let chat = HttpChatBackend::new(config.chat_config()).map_err(|e| {
            crate::core::error::StreamError::Configuration(e.to_string())
        })?;

        info!(
            recognition = recognition.is_some(),
            synthesis = synthesis.is_some(),
            chat_url = %config.chat_url,
            "Application state initialized"
        );

        Ok(Arc::new(Self {
            config,
            recognition,
            synthesis,
            chat: Arc::new(chat),
        }))
    }

    /// Assemble state from already-built parts.
    pub fn from_parts(
        config: ServerConfig,
        recognition: Option<RecognitionClient>,
        synthesis: Option<SynthesisClient>,
        chat: Arc<dyn ChatBackend>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            recognition,
            synthesis,
            chat,
        })
    }
}
