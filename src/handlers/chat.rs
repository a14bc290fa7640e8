//! Text chat handler

use std::sync::Arc;

use axum::{Json, extract::State};
use tracing::info;

use crate::chat::{ChatReply, ChatRequest};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// `POST /chat`
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> AppResult<Json<ChatReply>> {
    if request.query.trim().is_empty() {
        return Err(AppError::BadRequest("Query must not be empty".to_string()));
    }
    info!(user_id = %request.user_id, "Chat request");

    let reply = state
        .chat
        .request(
            &request.query,
            &request.user_id,
            request.conversation_id.as_deref(),
        )
        .await?;
    Ok(Json(reply))
}
