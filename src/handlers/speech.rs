//! Text-to-speech and chat-to-speech HTTP handlers

use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, stream};
use serde::Deserialize;
use tracing::{debug, info};

use crate::chat::ChatRequest;
use crate::core::error::StreamError;
use crate::core::forwarder::ResultStream;
use crate::core::tts::SynthesisClient;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Maximum accepted text length in characters.
pub const MAX_TEXT_CHARS: usize = 1024;

#[derive(Debug, Default, Deserialize)]
pub struct TextQuery {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    text: String,
}

/// `POST /text-to-speech`
///
/// Text comes from the `text` query parameter or a JSON body
/// `{"text": "..."}`. The synthesized audio is streamed back as it arrives.
pub async fn text_to_speech(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TextQuery>,
    body: Bytes,
) -> AppResult<Response> {
    let text = match query.text {
        Some(text) => text,
        None if body.is_empty() => {
            return Err(AppError::BadRequest("Missing 'text'".to_string()));
        }
        None => {
            let body: TextBody = serde_json::from_slice(&body)
                .map_err(|e| AppError::BadRequest(format!("Invalid request body: {e}")))?;
            body.text
        }
    };
    validate_text(&text)?;

    let synthesis = synthesis_client(&state)?;
    info!(chars = text.chars().count(), "Text-to-speech request");
    audio_response(synthesis, &text, HeaderMap::new()).await
}

/// `POST /chat/speech`
///
/// Ask the chat backend and speak its answer. Conversation and message ids
/// travel in the `X-Conversation-Id` and `X-Message-Id` headers.
pub async fn chat_speech(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> AppResult<Response> {
    validate_text(&request.query)?;
    let synthesis = synthesis_client(&state)?;

    let reply = state
        .chat
        .request(
            &request.query,
            &request.user_id,
            request.conversation_id.as_deref(),
        )
        .await?;
    if reply.answer.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Chat backend returned an empty answer".to_string(),
        ));
    }

    let mut headers = HeaderMap::new();
    for (name, value) in [
        ("x-conversation-id", &reply.conversation_id),
        ("x-message-id", &reply.message_id),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
    audio_response(synthesis, &reply.answer, headers).await
}

fn validate_text(text: &str) -> AppResult<()> {
    if text.trim().is_empty() {
        return Err(AppError::BadRequest("Text must not be empty".to_string()));
    }
    let chars = text.chars().count();
    if chars > MAX_TEXT_CHARS {
        return Err(AppError::BadRequest(format!(
            "Text is {chars} characters; the limit is {MAX_TEXT_CHARS}"
        )));
    }
    Ok(())
}

fn synthesis_client(state: &AppState) -> AppResult<&SynthesisClient> {
    state
        .synthesis
        .as_ref()
        .ok_or(AppError::NotConfigured("Speech synthesis"))
}

/// Stream synthesized audio for `text`.
///
/// The first chunk is awaited before the response starts so that a session
/// failing up front turns into an error status instead of an empty body.
async fn audio_response(
    synthesis: &SynthesisClient,
    text: &str,
    mut headers: HeaderMap,
) -> AppResult<Response> {
    let mut results = synthesis.synthesize(text).await?;
    let first = next_audio(&mut results).await.transpose()?;

    let rest = stream::unfold(results, |mut results| async move {
        next_audio(&mut results)
            .await
            .map(|chunk| (chunk, results))
    });
    let body = Body::from_stream(stream::iter(first.map(Ok)).chain(rest));

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(synthesis.config().content_type()),
    );
    let disposition = format!("attachment; filename=speech.{}", synthesis.config().encoding);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok((headers, body).into_response())
}

/// Next non-empty audio chunk, or the session error.
async fn next_audio(results: &mut ResultStream) -> Option<Result<Bytes, StreamError>> {
    while let Some(item) = results.next().await {
        match item {
            Ok(result) => match result.audio() {
                Some(audio) if !audio.is_empty() => {
                    debug!(bytes = audio.len(), is_final = result.is_final, "Audio chunk");
                    return Some(Ok(audio.clone()));
                }
                _ => continue,
            },
            Err(e) => return Some(Err(e)),
        }
    }
    None
}
