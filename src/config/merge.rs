//! Merging environment variables with YAML overrides.

use super::ServerConfig;
use super::env::{parse, var};
use super::yaml::YamlConfig;

/// Build a [`ServerConfig`] from the environment, then apply `yaml` on top.
///
/// Values missing from both fall back to [`ServerConfig::default`].
///
/// Priority: YAML > ENV (which already includes `.env`) > defaults.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml.unwrap_or_default();
    let server = yaml.server.unwrap_or_default();
    let recognition = yaml.recognition.unwrap_or_default();
    let synthesis = yaml.synthesis.unwrap_or_default();
    let chat = yaml.chat.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();
    let defaults = ServerConfig::default();

    Ok(ServerConfig {
        host: server
            .host
            .or_else(|| var("HOST"))
            .unwrap_or_else(|| defaults.host.clone()),
        port: server.port.or(parse("PORT")?).unwrap_or(defaults.port),
        cors_allowed_origins: security
            .cors_allowed_origins
            .or_else(|| var("CORS_ALLOWED_ORIGINS")),

        asr_url: recognition
            .url
            .or_else(|| var("ASR_URL"))
            .unwrap_or_else(|| defaults.asr_url.clone()),
        asr_app_key: recognition.app_key.or_else(|| var("ASR_APP_KEY")),
        asr_access_key: recognition.access_key.or_else(|| var("ASR_ACCESS_KEY")),
        asr_resource_id: recognition
            .resource_id
            .or_else(|| var("ASR_RESOURCE_ID"))
            .unwrap_or_else(|| defaults.asr_resource_id.clone()),
        asr_model_name: recognition
            .model_name
            .or_else(|| var("ASR_MODEL_NAME"))
            .unwrap_or_else(|| defaults.asr_model_name.clone()),
        asr_sample_rate: recognition
            .sample_rate
            .or(parse("ASR_SAMPLE_RATE")?)
            .unwrap_or(defaults.asr_sample_rate),
        asr_bits: recognition.bits.or(parse("ASR_BITS")?).unwrap_or(defaults.asr_bits),
        asr_channels: recognition.channels.or(parse("ASR_CHANNELS")?).unwrap_or(defaults.asr_channels),
        asr_segment_duration_ms: recognition
            .segment_duration_ms
            .or(parse("ASR_SEGMENT_DURATION_MS")?)
            .unwrap_or(defaults.asr_segment_duration_ms),
        asr_max_buffered_bytes: recognition
            .max_buffered_bytes
            .or(parse("ASR_MAX_BUFFERED_BYTES")?)
            .or(defaults.asr_max_buffered_bytes),

        tts_url: synthesis
            .url
            .or_else(|| var("TTS_URL"))
            .unwrap_or_else(|| defaults.tts_url.clone()),
        tts_app_id: synthesis.app_id.or_else(|| var("TTS_APP_ID")),
        tts_token: synthesis.token.or_else(|| var("TTS_TOKEN")),
        tts_cluster: synthesis
            .cluster
            .or_else(|| var("TTS_CLUSTER"))
            .unwrap_or_else(|| defaults.tts_cluster.clone()),
        tts_voice_type: synthesis
            .voice_type
            .or_else(|| var("TTS_VOICE_TYPE"))
            .unwrap_or_else(|| defaults.tts_voice_type.clone()),
        tts_encoding: synthesis
            .encoding
            .or_else(|| var("TTS_ENCODING"))
            .unwrap_or_else(|| defaults.tts_encoding.clone()),
        tts_speed_ratio: synthesis
            .speed_ratio
            .or(parse("TTS_SPEED_RATIO")?)
            .unwrap_or(defaults.tts_speed_ratio),

        chat_url: chat
            .url
            .or_else(|| var("CHAT_URL"))
            .unwrap_or_else(|| defaults.chat_url.clone()),
        chat_api_key: chat.api_key.or_else(|| var("CHAT_API_KEY")),
        chat_timeout_seconds: chat
            .timeout_seconds
            .or(parse("CHAT_TIMEOUT_SECONDS")?)
            .unwrap_or(defaults.chat_timeout_seconds),

        connect_timeout_seconds: session
            .connect_timeout_seconds
            .or(parse("SESSION_CONNECT_TIMEOUT_SECONDS")?)
            .unwrap_or(defaults.connect_timeout_seconds),
        inbound_timeout_seconds: session
            .inbound_timeout_seconds
            .or(parse("SESSION_INBOUND_TIMEOUT_SECONDS")?)
            .unwrap_or(defaults.inbound_timeout_seconds),
        grace_period_ms: session
            .grace_period_ms
            .or(parse("SESSION_GRACE_PERIOD_MS")?)
            .unwrap_or(defaults.grace_period_ms),
    })
}
