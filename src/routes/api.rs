use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, chat, speech};
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST API router
///
/// Trailing-slash variants are kept for clients written against the
/// earlier gateway.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/chat", post(chat::chat))
        .route("/chat/", post(chat::chat))
        .route("/chat/speech", post(speech::chat_speech))
        .route("/text-to-speech", post(speech::text_to_speech))
        .route("/text-to-speech/", post(speech::text_to_speech))
        .layer(TraceLayer::new_for_http())
}
