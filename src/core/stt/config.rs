//! Configuration for recognition sessions.

use std::time::Duration;

use crate::core::error::{StreamError, StreamResult};
use crate::core::forwarder::ForwarderConfig;
use crate::core::segmenter::{AudioFormat, SegmentRounding, SegmenterConfig};

/// Streaming recognition endpoint.
pub const DEFAULT_RECOGNITION_URL: &str = "wss://openspeech.bytedance.com/api/v3/sauc/bigmodel";

/// Duration-billed resource id.
pub const DEFAULT_RESOURCE_ID: &str = "volc.bigasr.sauc.duration";

pub const DEFAULT_MODEL_NAME: &str = "bigmodel";

/// Audio description for one session: the PCM layout used for segmenting and
/// the container/codec declared in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAudio {
    pub format: AudioFormat,
    pub container: String,
    pub codec: Option<String>,
}

impl SessionAudio {
    /// Raw PCM.
    pub fn pcm(format: AudioFormat) -> Self {
        Self {
            format,
            container: "pcm".to_string(),
            codec: Some("raw".to_string()),
        }
    }
}

#[derive(Clone)]
pub struct RecognitionConfig {
    pub url: String,
    pub app_key: String,
    pub access_key: String,
    pub resource_id: String,
    pub uid: String,
    pub format: AudioFormat,
    /// Container announced in the handshake (`pcm`, `wav`, `ogg`, ...).
    pub audio_container: String,
    pub audio_codec: Option<String>,
    pub model_name: String,
    pub enable_punc: bool,
    pub enable_itn: bool,
    pub enable_ddc: bool,
    pub segment_duration_ms: u32,
    pub rounding: SegmentRounding,
    pub max_buffered_bytes: Option<usize>,
    pub connect_timeout: Duration,
    pub inbound_timeout: Duration,
    pub grace_period: Duration,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        let forwarder = ForwarderConfig::default();
        Self {
            url: DEFAULT_RECOGNITION_URL.to_string(),
            app_key: String::new(),
            access_key: String::new(),
            resource_id: DEFAULT_RESOURCE_ID.to_string(),
            uid: "speechlink".to_string(),
            format: AudioFormat::default(),
            audio_container: "pcm".to_string(),
            audio_codec: Some("raw".to_string()),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            enable_punc: true,
            enable_itn: false,
            enable_ddc: false,
            segment_duration_ms: 100,
            rounding: SegmentRounding::Floor,
            max_buffered_bytes: Some(64000),
            connect_timeout: Duration::from_secs(10),
            inbound_timeout: forwarder.inbound_timeout,
            grace_period: forwarder.grace_period,
        }
    }
}

// Credentials stay out of logs.
impl std::fmt::Debug for RecognitionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionConfig")
            .field("url", &self.url)
            .field("app_key", &"<redacted>")
            .field("access_key", &"<redacted>")
            .field("resource_id", &self.resource_id)
            .field("uid", &self.uid)
            .field("format", &self.format)
            .field("audio_container", &self.audio_container)
            .field("audio_codec", &self.audio_codec)
            .field("model_name", &self.model_name)
            .field("segment_duration_ms", &self.segment_duration_ms)
            .field("max_buffered_bytes", &self.max_buffered_bytes)
            .finish_non_exhaustive()
    }
}

impl RecognitionConfig {
    /// Session audio as configured, before any caller overrides.
    pub fn session_audio(&self) -> SessionAudio {
        SessionAudio {
            format: self.format,
            container: self.audio_container.clone(),
            codec: self.audio_codec.clone(),
        }
    }

    pub fn segmenter_config(&self, format: AudioFormat) -> SegmenterConfig {
        SegmenterConfig {
            format,
            segment_duration_ms: self.segment_duration_ms,
            rounding: self.rounding,
            max_buffered_bytes: self.max_buffered_bytes,
        }
    }

    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            inbound_timeout: self.inbound_timeout,
            grace_period: self.grace_period,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.url.is_empty() {
            return Err(StreamError::Configuration(
                "Recognition URL is required".to_string(),
            ));
        }
        if self.model_name.is_empty() {
            return Err(StreamError::Configuration(
                "Recognition model name is required".to_string(),
            ));
        }
        if self.audio_container.is_empty() {
            return Err(StreamError::Configuration(
                "Recognition audio container is required".to_string(),
            ));
        }
        if self.inbound_timeout.is_zero() {
            return Err(StreamError::Configuration(
                "inbound_timeout must be greater than zero".to_string(),
            ));
        }
        self.segmenter_config(self.format).segment_size()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RecognitionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segmenter_config(config.format).segment_size().unwrap(), 3200);
    }

    #[test]
    fn test_session_audio_defaults_to_raw_pcm() {
        let config = RecognitionConfig::default();
        assert_eq!(config.session_audio(), SessionAudio::pcm(AudioFormat::default()));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = RecognitionConfig {
            access_key: "super-secret".to_string(),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("super-secret"));
    }

    #[test]
    fn test_zero_segment_duration_rejected() {
        let config = RecognitionConfig {
            segment_duration_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StreamError::Configuration(_))
        ));
    }
}
