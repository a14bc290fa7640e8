use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional so a file can override just a few values on top
/// of the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8000
///
/// recognition:
///   url: "wss://openspeech.bytedance.com/api/v3/sauc/bigmodel"
///   app_key: "your-app-key"
///   access_key: "your-access-key"
///   resource_id: "volc.bigasr.sauc.duration"
///   model_name: "bigmodel"
///   sample_rate: 16000
///   bits: 16
///   channels: 1
///   segment_duration_ms: 100
///   max_buffered_bytes: 64000
///
/// synthesis:
///   url: "wss://openspeech.bytedance.com/api/v1/tts/ws_binary"
///   app_id: "your-app-id"
///   token: "your-token"
///   cluster: "volcano_tts"
///   voice_type: "zh_female_qingxinnvsheng_mars_bigtts"
///   encoding: "mp3"
///   speed_ratio: 1.0
///
/// chat:
///   url: "http://127.0.0.1:8081/v1/chat-messages"
///   api_key: "app-xxxx"
///   timeout_seconds: 60
///
/// session:
///   connect_timeout_seconds: 10
///   inbound_timeout_seconds: 10
///   grace_period_ms: 3000
///
/// security:
///   cors_allowed_origins: "*"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub recognition: Option<RecognitionYaml>,
    pub synthesis: Option<SynthesisYaml>,
    pub chat: Option<ChatYaml>,
    pub session: Option<SessionYaml>,
    pub security: Option<SecurityYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Recognition service settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecognitionYaml {
    pub url: Option<String>,
    pub app_key: Option<String>,
    pub access_key: Option<String>,
    pub resource_id: Option<String>,
    pub model_name: Option<String>,
    pub sample_rate: Option<u32>,
    pub bits: Option<u16>,
    pub channels: Option<u16>,
    pub segment_duration_ms: Option<u32>,
    pub max_buffered_bytes: Option<usize>,
}

/// Synthesis service settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SynthesisYaml {
    pub url: Option<String>,
    pub app_id: Option<String>,
    pub token: Option<String>,
    pub cluster: Option<String>,
    pub voice_type: Option<String>,
    pub encoding: Option<String>,
    pub speed_ratio: Option<f32>,
}

/// Chat backend settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ChatYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Session timeouts from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub connect_timeout_seconds: Option<u64>,
    pub inbound_timeout_seconds: Option<u64>,
    pub grace_period_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
