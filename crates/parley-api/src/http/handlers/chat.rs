//! SSE streaming chat endpoint.
//!
//! POST /api/v1/chat/stream
//!
//! The body is validated before any stream is opened, so a bad request gets
//! a plain 400 envelope. After that the chat runs on its own task and every
//! [`StreamFrame`] it emits becomes one SSE event whose `data` is the frame's
//! JSON (`start`, `tools`, `token`, `error`, `end`). The stream closes right
//! after `end`.

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use parley_types::chat::{ChatRequest, StreamFrame};

use crate::http::error::AppError;
use crate::http::extractors::user::UserId;
use crate::state::AppState;

/// POST /api/v1/chat/stream
pub async fn stream_chat(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(request) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    let message = request.validate().map_err(AppError::Validation)?.to_string();
    let prior_turns = request.messages;

    let (responder, frames) = state.chat_service.open_stream();
    let service = state.chat_service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.run_chat(&user_id, &message, prior_turns, responder).await {
            debug!(user_id = %user_id, error = %e, "Chat stream finished with an error frame");
        }
    });

    let events = ReceiverStream::new(frames).map(|frame| Ok(frame_event(&frame)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn frame_event(frame: &StreamFrame) -> Event {
    match serde_json::to_string(frame) {
        Ok(json) => Event::default().event(frame.kind()).data(json),
        Err(e) => {
            warn!(error = %e, kind = frame.kind(), "Failed to serialize stream frame");
            Event::default().comment("unserializable frame")
        }
    }
}

