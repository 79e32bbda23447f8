// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Responsibilities:
// - `/conversation` on GET and POST
// - Request forwarding via injected UpstreamClient trait
// - Request-level errors mapped to 500 {"error": ...}
// - Heartbeat endpoint
// - 404 for unknown paths

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;

use crate::message::ConversationRequest;

/// Inbound body size limit.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Response handed back by the upstream client, ready to send to the browser.
#[derive(Debug)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl RelayResponse {
    /// Single JSON document with the given status.
    pub fn json(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: Body::from(body.into()),
        }
    }

    /// 200 `text/event-stream` response around a line stream.
    pub fn event_stream(body: Body) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Self {
            status: StatusCode::OK,
            headers,
            body,
        }
    }
}

/// Request-level failures. Every variant renders as `500 {"error": ...}`.
///
/// Messages must never carry credentials or upstream URLs.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid request body: {0}")]
    InvalidRequest(String),

    #[error("credential unavailable: {0}")]
    Credential(String),

    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("invalid upstream response: {0}")]
    InvalidUpstreamResponse(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Abstraction over the completion relay behind `/conversation`.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Whether responses are streamed. Decides GET semantics.
    fn streaming(&self) -> bool;

    /// Relay one conversation turn. `headers` are the inbound request headers.
    async fn converse(
        &self,
        request: ConversationRequest,
        headers: HeaderMap,
    ) -> Result<RelayResponse, RelayError>;
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Heartbeat endpoint: GET /heartbeat -> 200 OK
pub async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "unknown path")
}

/// `/conversation` handler.
///
/// A GET while streaming is configured gets an open, empty event stream.
/// Everything else must carry a `{"messages": [...]}` body.
pub async fn conversation(
    State(state): State<AppState>,
    request: Request<Body>,
) -> axum::response::Response {
    if request.method() == Method::GET && state.upstream.streaming() {
        return into_axum(RelayResponse::event_stream(Body::empty()));
    }

    let headers = request.headers().clone();

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read request body");
            return RelayError::InvalidRequest(e.to_string()).into_response();
        }
    };

    let conversation: ConversationRequest = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "rejected conversation request");
            return RelayError::InvalidRequest(e.to_string()).into_response();
        }
    };

    match state.upstream.converse(conversation, headers).await {
        Ok(resp) => into_axum(resp),
        Err(e) => {
            tracing::error!(error = %e, "conversation failed");
            e.into_response()
        }
    }
}

fn into_axum(resp: RelayResponse) -> axum::response::Response {
    let mut response = Response::new(resp.body);
    *response.status_mut() = resp.status;
    *response.headers_mut() = resp.headers;
    response
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router with the conversation and heartbeat endpoints.
///
/// The upstream client is injected. No side effects, no hard-coded clients.
pub fn build_router(upstream: Arc<dyn UpstreamClient>) -> Router {
    let state = AppState { upstream };

    Router::new()
        .route("/conversation", get(conversation).post(conversation))
        .route("/heartbeat", get(heartbeat))
        .fallback(not_found)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
