//! Chat API endpoints — the interface to the response pipeline.
//!
//! - `POST /v1/chat`        — non-streaming: drains the pipeline, returns
//!   the full response as one JSON body
//! - `POST /v1/chat/stream` — SSE streaming: forwards pipeline events as
//!   they arrive

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::Value;

use parley_domain::pending::PendingAction;

use crate::runtime::{run_chat, ChatEvent, ChatInput};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    /// User message text.
    pub message: String,
    /// Continue an existing session; absent starts a new one.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Client view state, forwarded into the system prompt.
    #[serde(default)]
    pub ui_context: Option<Value>,
    /// Pending actions carried over from earlier responses.
    #[serde(default)]
    pub pending_actions: Vec<PendingAction>,
}

impl ChatRequest {
    fn into_input(self, headers: &HeaderMap) -> ChatInput {
        ChatInput {
            user_id: self.user_id,
            message: self.message,
            session_id: self.session_id,
            ui_context: self.ui_context,
            pending_actions: self.pending_actions,
            forwarded_credential: bearer_token(headers),
        }
    }
}

/// The caller's bearer token, forwarded to the tool service.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    let user_id = body.user_id.clone();
    let _permit = match state.pipeline_slots.try_acquire(&user_id) {
        Ok(p) => p,
        Err(e) => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let mut rx = run_chat(state.clone(), body.into_input(&headers));

    // Drain all events and collect the final response.
    let mut content = String::new();
    let mut function_calls = Vec::new();
    let mut function_results = Vec::new();
    let mut session_id = None;
    let mut tokens_used = 0;
    let mut latency_ms = 0;
    let mut pending_imports = Vec::new();
    let mut error = None;

    while let Some(event) = rx.recv().await {
        match event {
            ChatEvent::ContentDelta { text: Some(t), .. } => content.push_str(&t),
            ChatEvent::FunctionCall { id, name } => {
                function_calls.push(serde_json::json!({ "id": id, "name": name }));
            }
            ChatEvent::FunctionResult {
                tool_use_id,
                name,
                result,
                is_error,
            } => {
                function_results.push(serde_json::json!({
                    "tool_use_id": tool_use_id,
                    "name": name,
                    "result": result,
                    "is_error": is_error,
                }));
            }
            ChatEvent::MessageEnd {
                session_id: sid,
                tokens_used: tokens,
                latency_ms: latency,
                pending_imports: pending,
            } => {
                session_id = Some(sid);
                tokens_used = tokens;
                latency_ms = latency;
                pending_imports = pending;
            }
            ChatEvent::Error {
                error_type,
                message,
            } => {
                error = Some(serde_json::json!({
                    "type": error_type,
                    "message": message,
                }));
            }
            ChatEvent::MessageStart { session_id: sid, .. } => {
                session_id.get_or_insert(sid);
            }
            ChatEvent::ContentDelta { .. } | ChatEvent::Heartbeat { .. } => {}
        }
    }

    if let Some(error) = error {
        return (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": error })),
        )
            .into_response();
    }

    Json(serde_json::json!({
        "session_id": session_id,
        "content": content,
        "function_calls": function_calls,
        "function_results": function_results,
        "tokens_used": tokens_used,
        "latency_ms": latency_ms,
        "pending_imports": pending_imports,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    let permit = match state.pipeline_slots.try_acquire(&body.user_id) {
        Ok(p) => p,
        Err(e) => {
            // Already committed to SSE — a single error event is the
            // stream-shaped version of a 429.
            let event = ChatEvent::error("rate_limit_exceeded", e.to_string());
            let stream = futures_util::stream::once(async move {
                Ok::<_, std::convert::Infallible>(sse_event(&event))
            });
            return Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response();
        }
    };

    let rx = run_chat(state.clone(), body.into_input(&headers));

    Sse::new(make_sse_stream(rx, permit))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn make_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<ChatEvent>,
    _permit: tokio::sync::OwnedSemaphorePermit,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(sse_event(&event));
        }
        // _permit is dropped here, releasing the pipeline slot.
    }
}

fn sse_event(event: &ChatEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.kind()).data(data)
}
