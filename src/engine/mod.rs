// Relay engine
//
// Wires request translation, the upstream transport and the stream
// reassembler together for one `/conversation` turn:
// - Resolve the API key
// - Build payload, URL and headers for the configured completion mode
// - Forward to the upstream endpoint
// - Streaming: reassemble delta lines into snapshot lines
// - Non-streaming: relay (retrieval) or reshape (plain) the single body

mod credential;
mod payload;

pub use credential::{credential_from_config, CredentialSource, EnvCredential, StaticCredential};
pub use payload::{
    build_headers, build_payload, build_url, is_chat_model, CompletionMode, CompletionPayload,
    DataSource, FieldsMapping, SearchParameters, USER_AGENT,
};

use crate::config::Config;
use crate::message::{ChatMessage, ConversationRequest, Role, Snapshot, SnapshotChoice};
use crate::proxy::{RelayError, RelayResponse, UpstreamClient};
use crate::stream::{StreamProcessor, StreamSettings};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use futures_util::TryStreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request context for structured logging
// ---------------------------------------------------------------------------

struct RequestContext {
    request_id: String,
    config_hash: String,
    mode: &'static str,
    deployment: String,
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Sends HTTP requests to the upstream completion endpoint.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Deadline for connecting and receiving response headers.
    pub timeout_ms: Option<u64>,
    pub stream: bool,
}

pub enum HttpBody {
    Full(Bytes),
    Stream(Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>),
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: HttpBody,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Timeout(String),
}

impl From<HttpError> for RelayError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(msg) => RelayError::UpstreamTimeout(msg),
            HttpError::Transport(msg) => RelayError::UpstreamFailure(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine dependencies
// ---------------------------------------------------------------------------

pub struct EngineDeps {
    pub config: Arc<Config>,
    pub http: Arc<dyn HttpSender>,
    pub credential: Arc<dyn CredentialSource>,
}

// ---------------------------------------------------------------------------
// RelayEngine
// ---------------------------------------------------------------------------

/// Upstream client that relays conversations to the completion endpoint.
pub struct RelayEngine {
    deps: EngineDeps,
    mode: CompletionMode,
}

impl RelayEngine {
    pub fn new_with(deps: EngineDeps) -> Self {
        let mode = CompletionMode::from_config(&deps.config);
        Self { deps, mode }
    }

    pub fn mode(&self) -> &CompletionMode {
        &self.mode
    }
}

#[async_trait]
impl UpstreamClient for RelayEngine {
    fn streaming(&self) -> bool {
        self.deps.config.stream
    }

    async fn converse(
        &self,
        request: ConversationRequest,
        headers: HeaderMap,
    ) -> Result<RelayResponse, RelayError> {
        let config = &self.deps.config;
        let ctx = RequestContext {
            request_id: Uuid::new_v4().to_string(),
            config_hash: config.config_hash.clone(),
            mode: self.mode.as_str(),
            deployment: config.upstream.deployment.clone(),
        };

        tracing::debug!(
            request_id = %ctx.request_id,
            mode = ctx.mode,
            deployment = %ctx.deployment,
            messages = request.messages.len(),
            "processing conversation"
        );

        // 1) Credential
        let api_key = self.deps.credential.api_key()?;

        // 2) Translate
        let payload = build_payload(config, &self.mode, request.messages);
        let body = serde_json::to_vec(&payload)
            .map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
        let fwd_headers =
            build_headers(&api_key, &headers, config.upstream.forward_authorization)?;

        let http_req = HttpRequest {
            method: Method::POST,
            url: build_url(&config.upstream, &self.mode),
            headers: fwd_headers,
            body: Bytes::from(body),
            timeout_ms: Some(config.upstream.timeout_ms),
            stream: config.stream,
        };

        // 3) Forward to upstream
        let started = Instant::now();
        let upstream = self.deps.http.send(http_req).await.map_err(|e| {
            tracing::warn!(
                request_id = %ctx.request_id,
                config_hash = %ctx.config_hash,
                mode = ctx.mode,
                deployment = %ctx.deployment,
                error = %e,
                "upstream request failed"
            );
            RelayError::from(e)
        })?;

        tracing::info!(
            request_id = %ctx.request_id,
            config_hash = %ctx.config_hash,
            mode = ctx.mode,
            deployment = %ctx.deployment,
            status = upstream.status.as_u16(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "upstream responded"
        );

        if config.stream {
            return Ok(self.handle_streaming_response(upstream, &ctx));
        }

        let body_bytes = match upstream.body {
            HttpBody::Full(b) => b,
            HttpBody::Stream(mut s) => {
                let mut collected = Vec::new();
                while let Some(chunk) = s.next().await {
                    collected.extend_from_slice(&chunk?);
                }
                Bytes::from(collected)
            }
        };

        self.handle_non_streaming_response(upstream.status, &body_bytes, &ctx)
    }
}

impl RelayEngine {
    fn handle_streaming_response(&self, upstream: HttpResponse, ctx: &RequestContext) -> RelayResponse {
        if !upstream.status.is_success() {
            // The error body still flows through the reassembler, which
            // relays it as an error line.
            tracing::warn!(
                request_id = %ctx.request_id,
                status = upstream.status.as_u16(),
                "upstream rejected streaming request"
            );
        }

        let input: Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>> =
            match upstream.body {
                HttpBody::Full(bytes) => {
                    Box::pin(futures_util::stream::once(async move { Ok(bytes) }))
                }
                HttpBody::Stream(s) => s,
            };

        let idle = Duration::from_millis(self.deps.config.upstream.idle_timeout_ms);
        let settings = StreamSettings::new(self.mode.reassembly()).with_idle_timeout(idle);

        let processed = StreamProcessor::new(settings).process(input);
        let body_stream = processed.map(Ok::<Bytes, std::convert::Infallible>);

        RelayResponse::event_stream(Body::from_stream(body_stream))
    }

    fn handle_non_streaming_response(
        &self,
        status: StatusCode,
        body: &Bytes,
        ctx: &RequestContext,
    ) -> Result<RelayResponse, RelayError> {
        let json: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
            tracing::warn!(
                request_id = %ctx.request_id,
                status = status.as_u16(),
                error = %e,
                "upstream body is not JSON"
            );
            RelayError::InvalidUpstreamResponse(format!("body is not valid JSON: {e}"))
        })?;

        let relayed = match self.mode {
            CompletionMode::RetrievalAugmented(_) => json,
            CompletionMode::Plain { .. } if json.get("error").is_some() => json,
            CompletionMode::Plain { .. } => {
                let snapshot = reshape_completion(&json)?;
                serde_json::to_value(snapshot)
                    .map_err(|e| RelayError::InvalidUpstreamResponse(e.to_string()))?
            }
        };

        Ok(RelayResponse::json(status, relayed.to_string()))
    }
}

/// Turn a full completion body into a snapshot carrying the single
/// assistant message.
pub fn reshape_completion(body: &serde_json::Value) -> Result<Snapshot, RelayError> {
    let field = |name: &str| {
        body.get(name)
            .ok_or_else(|| RelayError::InvalidUpstreamResponse(format!("missing field '{name}'")))
    };

    let choice = field("choices")?
        .get(0)
        .ok_or_else(|| RelayError::InvalidUpstreamResponse("empty 'choices'".to_string()))?;
    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| choice.get("text"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();

    let as_string = |name: &str| -> Result<String, RelayError> {
        field(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RelayError::InvalidUpstreamResponse(format!("field '{name}' is not a string")))
    };

    Ok(Snapshot {
        id: as_string("id")?,
        model: as_string("model")?,
        created: field("created")?.as_u64().ok_or_else(|| {
            RelayError::InvalidUpstreamResponse("field 'created' is not an integer".to_string())
        })?,
        object: as_string("object")?,
        choices: vec![SnapshotChoice {
            messages: vec![ChatMessage::new(Role::Assistant, content)],
        }],
    })
}

// ---------------------------------------------------------------------------
// Reqwest HTTP sender
// ---------------------------------------------------------------------------

pub struct ReqwestHttpSender {
    client: reqwest::Client,
}

impl ReqwestHttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Convert a reqwest error without its URL, which carries the resource
/// endpoint and never belongs in a client-facing message.
fn transport_error(e: reqwest::Error) -> HttpError {
    let e = e.without_url();
    if e.is_timeout() {
        HttpError::Timeout(e.to_string())
    } else {
        HttpError::Transport(e.to_string())
    }
}

#[async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let deadline = request.timeout_ms.map(Duration::from_millis);

        let mut req = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body);

        // reqwest's timeout covers the whole body, which would cut a long
        // stream short. Streaming bounds only the wait for headers.
        if !request.stream {
            if let Some(deadline) = deadline {
                req = req.timeout(deadline);
            }
        }

        let pending = req.send();
        let resp = match (request.stream, deadline) {
            (true, Some(deadline)) => tokio::time::timeout(deadline, pending)
                .await
                .map_err(|_| {
                    HttpError::Timeout(format!(
                        "no response headers within {} ms",
                        deadline.as_millis()
                    ))
                })?,
            _ => pending.await,
        }
        .map_err(transport_error)?;

        let status = resp.status();
        let headers = resp.headers().clone();

        if request.stream {
            let stream = resp.bytes_stream().map_err(transport_error);
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Stream(Box::pin(stream)),
            })
        } else {
            let body = resp.bytes().await.map_err(transport_error)?;
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Full(body),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Public factory for the default engine
// ---------------------------------------------------------------------------

pub fn build_engine(config: Arc<Config>) -> Result<RelayEngine, HttpError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(config.upstream.timeout_ms))
        .build()
        .map_err(transport_error)?;

    let deps = EngineDeps {
        credential: credential_from_config(&config.upstream.credential),
        http: Arc::new(ReqwestHttpSender::new(client)),
        config,
    };

    Ok(RelayEngine::new_with(deps))
}
