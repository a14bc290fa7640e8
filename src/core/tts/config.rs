//! Configuration for synthesis sessions.

use std::time::Duration;

use crate::core::error::{StreamError, StreamResult};
use crate::core::forwarder::ForwarderConfig;

/// Binary streaming synthesis endpoint.
pub const DEFAULT_SYNTHESIS_URL: &str = "wss://openspeech.bytedance.com/api/v1/tts/ws_binary";

pub const DEFAULT_CLUSTER: &str = "volcano_tts";

pub const DEFAULT_VOICE_TYPE: &str = "zh_female_qingxinnvsheng_mars_bigtts";

#[derive(Clone)]
pub struct SynthesisConfig {
    pub url: String,
    pub app_id: String,
    pub token: String,
    pub cluster: String,
    pub voice_type: String,
    /// Output encoding, e.g. `mp3`, `wav`, `pcm`.
    pub encoding: String,
    pub speed_ratio: f32,
    pub volume_ratio: f32,
    pub pitch_ratio: f32,
    pub uid: String,
    pub connect_timeout: Duration,
    pub inbound_timeout: Duration,
    pub grace_period: Duration,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        let forwarder = ForwarderConfig::default();
        Self {
            url: DEFAULT_SYNTHESIS_URL.to_string(),
            app_id: String::new(),
            token: String::new(),
            cluster: DEFAULT_CLUSTER.to_string(),
            voice_type: DEFAULT_VOICE_TYPE.to_string(),
            encoding: "mp3".to_string(),
            speed_ratio: 1.0,
            volume_ratio: 1.0,
            pitch_ratio: 1.0,
            uid: "speechlink".to_string(),
            connect_timeout: Duration::from_secs(10),
            inbound_timeout: forwarder.inbound_timeout,
            grace_period: forwarder.grace_period,
        }
    }
}

impl std::fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("url", &self.url)
            .field("app_id", &self.app_id)
            .field("token", &"<redacted>")
            .field("cluster", &self.cluster)
            .field("voice_type", &self.voice_type)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl SynthesisConfig {
    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            inbound_timeout: self.inbound_timeout,
            grace_period: self.grace_period,
            ..Default::default()
        }
    }

    /// MIME type of the synthesized audio.
    pub fn content_type(&self) -> &'static str {
        match self.encoding.as_str() {
            "wav" => "audio/wav",
            "pcm" => "audio/pcm",
            "ogg_opus" => "audio/ogg",
            _ => "audio/mpeg",
        }
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.url.is_empty() {
            return Err(StreamError::Configuration(
                "Synthesis URL is required".to_string(),
            ));
        }
        if self.voice_type.is_empty() {
            return Err(StreamError::Configuration(
                "voice_type is required".to_string(),
            ));
        }
        for (name, value) in [
            ("speed_ratio", self.speed_ratio),
            ("volume_ratio", self.volume_ratio),
            ("pitch_ratio", self.pitch_ratio),
        ] {
            if !(0.1..=3.0).contains(&value) {
                return Err(StreamError::Configuration(format!(
                    "{name} must be between 0.1 and 3.0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SynthesisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.content_type(), "audio/mpeg");
    }

    #[test]
    fn test_ratio_out_of_range() {
        let config = SynthesisConfig {
            speed_ratio: 5.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StreamError::Configuration(msg)) if msg.contains("speed_ratio")
        ));
    }
}
