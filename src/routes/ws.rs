//! WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::asr_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the recognition relay router
///
/// # Endpoint
///
/// `GET /ws/asr` - WebSocket upgrade for streaming recognition
///
/// # Example
///
/// ```json
/// // Client sends its audio format first
/// {"audio_config": {"format": "pcm", "rate": 16000, "bits": 16, "channel": 1}}
///
/// // then binary messages: [flag byte][PCM...], flag 1 on the last chunk
///
/// // Server replies
/// {"type": "result", "text": "hello", "is_final": false}
/// ```
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/asr", get(asr_handler))
        .layer(TraceLayer::new_for_http())
}
