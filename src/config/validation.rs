//! Configuration validation logic.

use super::ServerConfig;

/// Validate the merged configuration.
///
/// Credentials are not required here: a gateway without recognition keys can
/// still serve synthesis and chat.
pub(super) fn validate_server_config(config: &ServerConfig) -> Result<(), String> {
    if config.host.trim().is_empty() {
        return Err("HOST must not be empty".to_string());
    }
    if config.connect_timeout_seconds == 0 {
        return Err("SESSION_CONNECT_TIMEOUT_SECONDS must be greater than zero".to_string());
    }
    validate_url("ASR_URL", &config.asr_url, &["ws", "wss"])?;
    validate_url("TTS_URL", &config.tts_url, &["ws", "wss"])?;
    validate_url("CHAT_URL", &config.chat_url, &["http", "https"])?;

    config
        .recognition_config()
        .validate()
        .map_err(|e| format!("Invalid recognition settings: {e}"))?;
    config
        .synthesis_config()
        .validate()
        .map_err(|e| format!("Invalid synthesis settings: {e}"))?;
    Ok(())
}

fn validate_url(name: &str, value: &str, schemes: &[&str]) -> Result<(), String> {
    let parsed = url::Url::parse(value).map_err(|e| format!("Invalid {name} '{value}': {e}"))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(format!(
            "{name} must use one of {schemes:?}, got '{}'",
            parsed.scheme()
        ));
    }
    Ok(())
}
