//! Configuration module for the speechlink gateway
//!
//! Server configuration comes from .env files, YAML files and environment
//! variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use speechlink_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::{
    ChatYaml, RecognitionYaml, SecurityYaml, ServerYaml, SessionYaml, SynthesisYaml, YamlConfig,
};

use crate::chat::ChatConfig;
use crate::core::segmenter::AudioFormat;
use crate::core::stt::{
    DEFAULT_MODEL_NAME, DEFAULT_RECOGNITION_URL, DEFAULT_RESOURCE_ID, RecognitionConfig,
};
use crate::core::tts::{DEFAULT_CLUSTER, DEFAULT_SYNTHESIS_URL, DEFAULT_VOICE_TYPE, SynthesisConfig};

/// Local Dify chat endpoint.
pub const DEFAULT_CHAT_URL: &str = "http://127.0.0.1:8081/v1/chat-messages";

/// Server configuration
///
/// Flat view of every setting after merging. Session clients are derived
/// from it with [`ServerConfig::recognition_config`] and friends.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Comma separated origins, or `*` for any.
    pub cors_allowed_origins: Option<String>,

    // Recognition
    pub asr_url: String,
    pub asr_app_key: Option<String>,
    pub asr_access_key: Option<String>,
    pub asr_resource_id: String,
    pub asr_model_name: String,
    pub asr_sample_rate: u32,
    pub asr_bits: u16,
    pub asr_channels: u16,
    pub asr_segment_duration_ms: u32,
    pub asr_max_buffered_bytes: Option<usize>,

    // Synthesis
    pub tts_url: String,
    pub tts_app_id: Option<String>,
    pub tts_token: Option<String>,
    pub tts_cluster: String,
    pub tts_voice_type: String,
    pub tts_encoding: String,
    pub tts_speed_ratio: f32,

    // Chat backend
    pub chat_url: String,
    pub chat_api_key: Option<String>,
    pub chat_timeout_seconds: u64,

    // Session timing
    pub connect_timeout_seconds: u64,
    pub inbound_timeout_seconds: u64,
    pub grace_period_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let format = AudioFormat::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_allowed_origins: None,
            asr_url: DEFAULT_RECOGNITION_URL.to_string(),
            asr_app_key: None,
            asr_access_key: None,
            asr_resource_id: DEFAULT_RESOURCE_ID.to_string(),
            asr_model_name: DEFAULT_MODEL_NAME.to_string(),
            asr_sample_rate: format.sample_rate,
            asr_bits: format.bits,
            asr_channels: format.channels,
            asr_segment_duration_ms: 100,
            asr_max_buffered_bytes: Some(64000),
            tts_url: DEFAULT_SYNTHESIS_URL.to_string(),
            tts_app_id: None,
            tts_token: None,
            tts_cluster: DEFAULT_CLUSTER.to_string(),
            tts_voice_type: DEFAULT_VOICE_TYPE.to_string(),
            tts_encoding: "mp3".to_string(),
            tts_speed_ratio: 1.0,
            chat_url: DEFAULT_CHAT_URL.to_string(),
            chat_api_key: None,
            chat_timeout_seconds: 60,
            connect_timeout_seconds: 10,
            inbound_timeout_seconds: 10,
            grace_period_ms: 3000,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("asr_url", &self.asr_url)
            .field("asr_resource_id", &self.asr_resource_id)
            .field("tts_url", &self.tts_url)
            .field("tts_voice_type", &self.tts_voice_type)
            .field("chat_url", &self.chat_url)
            .finish_non_exhaustive()
    }
}

/// Zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        for secret in [
            &mut self.asr_app_key,
            &mut self.asr_access_key,
            &mut self.tts_token,
            &mut self.chat_api_key,
        ]
        .into_iter()
        .flatten()
        {
            secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// `.env` is loaded in `main.rs` before this runs, so its values are
    /// already visible as environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation
    /// fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate_server_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_server_config(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.asr_sample_rate,
            bits: self.asr_bits,
            channels: self.asr_channels,
        }
    }

    fn session_timeouts(&self) -> (Duration, Duration, Duration) {
        (
            Duration::from_secs(self.connect_timeout_seconds),
            Duration::from_secs(self.inbound_timeout_seconds),
            Duration::from_millis(self.grace_period_ms),
        )
    }

    /// Settings for [`crate::core::stt::RecognitionClient`].
    pub fn recognition_config(&self) -> RecognitionConfig {
        let (connect_timeout, inbound_timeout, grace_period) = self.session_timeouts();
        RecognitionConfig {
            url: self.asr_url.clone(),
            app_key: self.asr_app_key.clone().unwrap_or_default(),
            access_key: self.asr_access_key.clone().unwrap_or_default(),
            resource_id: self.asr_resource_id.clone(),
            model_name: self.asr_model_name.clone(),
            format: self.audio_format(),
            segment_duration_ms: self.asr_segment_duration_ms,
            max_buffered_bytes: self.asr_max_buffered_bytes,
            connect_timeout,
            inbound_timeout,
            grace_period,
            ..Default::default()
        }
    }

    /// Settings for [`crate::core::tts::SynthesisClient`].
    pub fn synthesis_config(&self) -> SynthesisConfig {
        let (connect_timeout, inbound_timeout, grace_period) = self.session_timeouts();
        SynthesisConfig {
            url: self.tts_url.clone(),
            app_id: self.tts_app_id.clone().unwrap_or_default(),
            token: self.tts_token.clone().unwrap_or_default(),
            cluster: self.tts_cluster.clone(),
            voice_type: self.tts_voice_type.clone(),
            encoding: self.tts_encoding.clone(),
            speed_ratio: self.tts_speed_ratio,
            connect_timeout,
            inbound_timeout,
            grace_period,
            ..Default::default()
        }
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            url: self.chat_url.clone(),
            api_key: self.chat_api_key.clone(),
            timeout: Duration::from_secs(self.chat_timeout_seconds),
        }
    }

    /// Whether recognition credentials are configured.
    pub fn has_recognition_credentials(&self) -> bool {
        self.asr_app_key.is_some() && self.asr_access_key.is_some()
    }

    /// Whether synthesis credentials are configured.
    pub fn has_synthesis_credentials(&self) -> bool {
        self.tts_app_id.is_some() && self.tts_token.is_some()
    }
}
