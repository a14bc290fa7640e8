//! Handshake payload for recognition sessions.

use serde::{Deserialize, Serialize};

use super::config::SessionAudio;
use crate::core::segmenter::AudioFormat;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionRequest {
    pub user: UserMeta,
    pub audio: AudioMeta,
    pub request: RequestMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMeta {
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMeta {
    pub format: String,
    pub rate: u32,
    pub bits: u16,
    pub channel: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

impl AudioMeta {
    /// Raw PCM in the given format.
    pub fn pcm(format: &AudioFormat) -> Self {
        Self::from(&SessionAudio::pcm(*format))
    }
}

impl From<&SessionAudio> for AudioMeta {
    fn from(audio: &SessionAudio) -> Self {
        Self {
            format: audio.container.clone(),
            rate: audio.format.sample_rate,
            bits: audio.format.bits,
            channel: audio.format.channels,
            codec: audio.codec.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub model_name: String,
    pub enable_punc: bool,
    pub enable_itn: bool,
    pub enable_ddc: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let request = RecognitionRequest {
            user: UserMeta {
                uid: "t1".to_string(),
            },
            audio: AudioMeta::pcm(&AudioFormat::default()),
            request: RequestMeta {
                model_name: "bigmodel".to_string(),
                enable_punc: true,
                enable_itn: false,
                enable_ddc: false,
            },
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "user": {"uid": "t1"},
                "audio": {"format": "pcm", "rate": 16000, "bits": 16, "channel": 1, "codec": "raw"},
                "request": {
                    "model_name": "bigmodel",
                    "enable_punc": true,
                    "enable_itn": false,
                    "enable_ddc": false
                }
            })
        );
    }

    #[test]
    fn test_audio_meta_keeps_container_and_codec() {
        let audio = SessionAudio {
            format: AudioFormat::default(),
            container: "ogg".to_string(),
            codec: Some("opus".to_string()),
        };
        let value = serde_json::to_value(AudioMeta::from(&audio)).unwrap();
        assert_eq!(value["format"], "ogg");
        assert_eq!(value["codec"], "opus");
        assert_eq!(value["rate"], 16000);
    }

    #[test]
    fn test_codec_omitted_when_absent() {
        let mut audio = AudioMeta::pcm(&AudioFormat::default());
        audio.codec = None;
        let value = serde_json::to_value(&audio).unwrap();
        assert!(value.get("codec").is_none());
    }
}
