//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `asr` - Recognition relay WebSocket
//! - `chat` - Text chat REST API
//! - `speech` - Text-to-speech and chat-to-speech REST API

pub mod api;
pub mod asr;
pub mod chat;
pub mod speech;

pub use asr::asr_handler;
