//! `POST /message` and `POST /message/stream` — the channel-agnostic HTTP
//! surface (§6.1). Distinct from `/chat`, which is the terminal-flavored
//! convenience endpoint with its own session_id-based addressing; `/message`
//! addresses conversations by `(user_id, conversation_id)` the way a
//! programmatic integration would.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use nexus_agent::pipeline::process_message_non_streaming;
use nexus_agent::provider::ProviderError;
use nexus_agent::stream::StreamEvent;

use crate::app::AppState;
use crate::http::chat::{check_auth, extract_bearer};

#[derive(Deserialize)]
pub struct MessageRequest {
    pub content: String,
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    #[allow(dead_code)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct MessageReply {
    pub content: String,
    pub thread_id: String,
}

#[derive(Serialize)]
pub struct MessageError {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl MessageError {
    fn llm(message: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            error: "llm_error".to_string(),
            message: message.into(),
            provider: Some(provider.into()),
        }
    }

    fn other(message: impl Into<String>) -> Self {
        Self {
            error: "error".to_string(),
            message: message.into(),
            provider: None,
        }
    }
}

/// `http:{user_id}:{conversation_id}` — stable across repeated calls with the
/// same pair, consistent with `/chat`'s `http:terminal:{session_id}` scheme.
fn session_key_for(user_id: &str, conversation_id: Option<&str>) -> String {
    format!("http:{}:{}", user_id, conversation_id.unwrap_or("default"))
}

fn require_auth(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<MessageError>)> {
    let require_user = matches!(
        state.config.gateway.auth.mode,
        nexus_core::config::AuthMode::Token
    );
    if require_user && extract_bearer(headers).is_none() {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(MessageError::other("missing bearer token")),
        ));
    }
    if !check_auth(state, headers) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(MessageError::other("unauthorized")),
        ));
    }
    Ok(())
}

/// POST /message — body `{content, user_id, conversation_id?, stream?, metadata?}`.
/// Returns `{content, thread_id}`, or an SSE stream when `stream: true`.
pub async fn message_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<MessageRequest>,
) -> axum::response::Response {
    if let Err(err) = require_auth(&state, &headers) {
        return err.into_response();
    }
    if req.content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(MessageError::other("content cannot be empty")),
        )
            .into_response();
    }

    if req.stream {
        return stream_reply(state, req).await.into_response();
    }

    let thread_id = session_key_for(&req.user_id, req.conversation_id.as_deref());
    let cancel = CancellationToken::new();
    state
        .active_operations
        .insert(thread_id.clone(), cancel.clone());

    let result = process_message_non_streaming(
        &state,
        &thread_id,
        "http",
        &req.content,
        None,
        None,
        None,
        Some(cancel),
        None,
    )
    .await;
    state.active_operations.remove(&thread_id);

    match result {
        Ok(r) => Json(MessageReply {
            content: r.content,
            thread_id,
        })
        .into_response(),
        Err(ProviderError::Cancelled) => Json(MessageReply {
            content: "Operation cancelled.".to_string(),
            thread_id,
        })
        .into_response(),
        Err(e @ (ProviderError::Api { .. } | ProviderError::Unavailable(_))) => (
            StatusCode::BAD_REQUEST,
            Json(MessageError::llm(e.to_string(), state.agent.provider().name().to_string())),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "POST /message failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageError::other(e.to_string())),
            )
                .into_response()
        }
    }
}

/// POST /message/stream — always streams, regardless of the `stream` field.
pub async fn message_stream_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut req): Json<MessageRequest>,
) -> axum::response::Response {
    if let Err(err) = require_auth(&state, &headers) {
        return err.into_response();
    }
    req.stream = true;
    stream_reply(state, req).await.into_response()
}

/// Shared SSE body for both `/message?stream=true` and `/message/stream`.
///
/// Streams raw model text deltas — like `/v1/chat/completions`, this
/// bypasses the tool loop; only the non-streaming path runs the full
/// agentic pipeline (tools, memory, instincts). A streamed turn that needs
/// a tool call will not execute one.
async fn stream_reply(
    state: Arc<AppState>,
    req: MessageRequest,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let thread_id = session_key_for(&req.user_id, req.conversation_id.as_deref());
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);

    let content = req.content.clone();
    let reply_thread_id = thread_id.clone();
    tokio::spawn(async move {
        if let Err(e) = state.agent.chat_stream(&content, tx).await {
            warn!(error = %e, "POST /message/stream failed");
        }
    });

    let stream = async_stream::stream! {
        yield Ok(Event::default().data(format!("[THREAD:{}]", reply_thread_id)));
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    yield Ok(Event::default().data(text));
                }
                StreamEvent::Done { .. } => {
                    yield Ok(Event::default().data("[DONE]"));
                }
                StreamEvent::Error { message } => {
                    yield Ok(Event::default().data(format!("[ERROR] {message}")));
                    yield Ok(Event::default().data("[DONE]"));
                }
                _ => {}
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /summarize — one-shot summarization via a utility model; bypasses the agent.
#[derive(Deserialize)]
pub struct SummarizeRequest {
    pub content: String,
    #[serde(default = "default_summary_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_summary_max_tokens() -> u32 {
    512
}

#[derive(Serialize)]
pub struct SummarizeReply {
    pub summary: String,
}

pub async fn summarize_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SummarizeRequest>,
) -> axum::response::Response {
    if let Err(err) = require_auth(&state, &headers) {
        return err.into_response();
    }
    if req.content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(MessageError::other("content cannot be empty")),
        )
            .into_response();
    }

    match state
        .agent
        .summarize(&req.content, req.max_tokens, req.model.as_deref())
        .await
    {
        Ok(resp) => Json(SummarizeReply {
            summary: resp.content,
        })
        .into_response(),
        Err(e @ (ProviderError::Api { .. } | ProviderError::Unavailable(_))) => (
            StatusCode::BAD_REQUEST,
            Json(MessageError::llm(e.to_string(), state.agent.provider().name().to_string())),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "POST /summarize failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageError::other(e.to_string())),
            )
                .into_response()
        }
    }
}
