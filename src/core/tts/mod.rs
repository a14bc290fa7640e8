//! Streaming speech synthesis over the binary protocol.

mod client;
mod config;
mod messages;

pub use client::SynthesisClient;
pub use config::{DEFAULT_CLUSTER, DEFAULT_SYNTHESIS_URL, DEFAULT_VOICE_TYPE, SynthesisConfig};
pub use messages::{
    AppMeta, Operation, SynthesisAudio, SynthesisRequest, SynthesisRequestMeta, SynthesisUser,
    TextType,
};
