// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

// Outbound request translation
//
// Builds the completion payload, URL and headers from the inbound chat
// history and the process configuration.

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use serde::Serialize;

use crate::config::{Config, SearchConfig, Secret, UpstreamConfig};
use crate::message::{ChatMessage, Role};
use crate::proxy::RelayError;
use crate::stream::ReassemblyMode;

/// Value of the `x-ms-useragent` header sent upstream.
pub const USER_AGENT: &str = "GitHubSampleWebApp/PublicAPI/1.0.0";

// ---------------------------------------------------------------------------
// Completion mode
// ---------------------------------------------------------------------------

/// How the relay talks to the upstream. Chosen once at process start.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionMode {
    /// Chat (or legacy) completions with the configured system message.
    Plain { chat_model: bool },
    /// Extensions endpoint with a search data source.
    RetrievalAugmented(SearchConfig),
}

impl CompletionMode {
    pub fn from_config(config: &Config) -> Self {
        match &config.search {
            Some(search) => CompletionMode::RetrievalAugmented(search.clone()),
            None => CompletionMode::Plain {
                chat_model: is_chat_model(&config.upstream.model_name),
            },
        }
    }

    pub fn reassembly(&self) -> ReassemblyMode {
        match self {
            CompletionMode::Plain { .. } => ReassemblyMode::Plain,
            CompletionMode::RetrievalAugmented(_) => ReassemblyMode::RetrievalAugmented,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.reassembly().as_str()
    }
}

/// Whether the model speaks the chat completions API.
pub fn is_chat_model(model_name: &str) -> bool {
    let name = model_name.to_ascii_lowercase();
    name.contains("gpt-4") || name.starts_with("gpt-35-turbo")
}

// ---------------------------------------------------------------------------
// URL
// ---------------------------------------------------------------------------

pub fn build_url(upstream: &UpstreamConfig, mode: &CompletionMode) -> String {
    let base = format!("{}/deployments/{}", upstream.resource, upstream.deployment);
    match mode {
        CompletionMode::RetrievalAugmented(_) => format!(
            "{base}/extensions/chat/completions?api-version={}",
            upstream.preview_api_version
        ),
        CompletionMode::Plain { chat_model: true } => {
            format!("{base}/chat/completions?api-version={}", upstream.api_version)
        }
        CompletionMode::Plain { chat_model: false } => {
            format!("{base}/completions?api-version={}", upstream.api_version)
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CompletionPayload<'a> {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub stop: Option<&'a [String]>,
    pub stream: bool,
    #[serde(rename = "dataSources", skip_serializing_if = "Option::is_none")]
    pub data_sources: Option<Vec<DataSource<'a>>>,
}

#[derive(Debug, Serialize)]
pub struct DataSource<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub parameters: SearchParameters<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParameters<'a> {
    pub endpoint: String,
    pub key: &'a str,
    pub index_name: &'a str,
    pub fields_mapping: FieldsMapping<'a>,
    pub in_scope: bool,
    pub top_n_documents: u32,
    pub query_type: &'static str,
    pub semantic_configuration: &'a str,
    pub role_information: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldsMapping<'a> {
    pub content_field: &'a [String],
    pub title_field: Option<&'a str>,
    pub url_field: Option<&'a str>,
    pub filepath_field: Option<&'a str>,
}

/// Build the upstream body for one conversation turn.
///
/// Plain requests get the system message prepended. Retrieval requests
/// send the inbound messages unchanged and carry the system message as
/// `roleInformation` instead.
pub fn build_payload<'a>(
    config: &'a Config,
    mode: &'a CompletionMode,
    inbound: Vec<ChatMessage>,
) -> CompletionPayload<'a> {
    let (messages, data_sources) = match mode {
        CompletionMode::Plain { .. } => {
            let mut messages = Vec::with_capacity(inbound.len() + 1);
            messages.push(ChatMessage::new(Role::System, config.system_message.clone()));
            messages.extend(inbound);
            (messages, None)
        }
        CompletionMode::RetrievalAugmented(search) => (
            inbound,
            Some(vec![search_data_source(search, &config.system_message)]),
        ),
    };

    CompletionPayload {
        messages,
        temperature: config.sampling.temperature,
        max_tokens: config.sampling.max_tokens,
        top_p: config.sampling.top_p,
        stop: config.sampling.stop.as_deref(),
        stream: config.stream,
        data_sources,
    }
}

fn search_data_source<'a>(search: &'a SearchConfig, system_message: &'a str) -> DataSource<'a> {
    let semantic_configuration = if search.use_semantic_search {
        search.semantic_configuration.as_str()
    } else {
        ""
    };

    DataSource {
        kind: "AzureCognitiveSearch",
        parameters: SearchParameters {
            endpoint: search.endpoint(),
            key: search.key.expose(),
            index_name: &search.index,
            fields_mapping: FieldsMapping {
                content_field: &search.content_columns,
                title_field: search.title_column.as_deref(),
                url_field: search.url_column.as_deref(),
                filepath_field: search.filename_column.as_deref(),
            },
            in_scope: search.in_domain,
            top_n_documents: search.top_k,
            query_type: if search.use_semantic_search {
                "semantic"
            } else {
                "simple"
            },
            semantic_configuration,
            role_information: system_message,
        },
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Outbound headers. The inbound `Authorization` header is copied only when
/// `forward_authorization` is set.
pub fn build_headers(
    api_key: &Secret,
    inbound: &HeaderMap,
    forward_authorization: bool,
) -> Result<HeaderMap, RelayError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut key = HeaderValue::from_str(api_key.expose()).map_err(|_| {
        RelayError::Credential("API key contains characters not allowed in a header".to_string())
    })?;
    key.set_sensitive(true);
    headers.insert("api-key", key);

    headers.insert("x-ms-useragent", HeaderValue::from_static(USER_AGENT));

    if forward_authorization {
        if let Some(auth) = inbound.get(AUTHORIZATION) {
            let mut auth = auth.clone();
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }
    }

    Ok(headers)
}
