//! Streaming speech recognition over the binary protocol.

mod client;
mod config;
mod messages;

pub use client::{RecognitionClient, merge_audio_config};
pub use config::{
    DEFAULT_MODEL_NAME, DEFAULT_RECOGNITION_URL, DEFAULT_RESOURCE_ID, RecognitionConfig,
    SessionAudio,
};
pub use messages::{AudioMeta, RecognitionRequest, RequestMeta, UserMeta};
