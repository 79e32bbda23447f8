// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated relay config. Resolved once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config format version. Always "v1".
    pub version: String,
    /// Environment label (e.g. "dev", "production").
    pub environment: String,
    /// Whether responses are streamed to the browser.
    pub stream: bool,
    /// System prompt prepended to plain requests and sent as
    /// `roleInformation` to the search data source.
    pub system_message: String,
    pub upstream: UpstreamConfig,
    pub sampling: SamplingConfig,
    /// Present only when service, index and key are all set.
    pub search: Option<SearchConfig>,
    /// SHA256 of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// Upstream completion endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Resource base URL, e.g. `https://my-resource.openai.azure.com/openai`.
    /// Stored without a trailing slash.
    pub resource: String,
    /// Deployment name used in the request path.
    pub deployment: String,
    /// Underlying model name, decides chat vs legacy completions.
    pub model_name: String,
    pub credential: CredentialConfig,
    pub api_version: String,
    pub preview_api_version: String,
    /// Forward the browser's `Authorization` header to the upstream.
    pub forward_authorization: bool,
    pub timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

/// Where the upstream API key comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialConfig {
    /// Key given in the config (usually through `${VAR}` interpolation).
    Static(Secret),
    /// Name of an environment variable read on every request.
    Env(String),
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    /// `None` serializes as `null` upstream.
    pub stop: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Retrieval (Azure Cognitive Search data source)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub service: String,
    pub index: String,
    pub key: Secret,
    pub use_semantic_search: bool,
    pub semantic_configuration: String,
    pub top_k: u32,
    pub in_domain: bool,
    pub content_columns: Vec<String>,
    pub title_column: Option<String>,
    pub url_column: Option<String>,
    pub filename_column: Option<String>,
}

impl SearchConfig {
    pub fn endpoint(&self) -> String {
        format!("https://{}.search.windows.net", self.service)
    }
}

// ---------------------------------------------------------------------------
// Secret wrapper
// ---------------------------------------------------------------------------

/// A credential value. `Debug` never prints the content.
#[derive(Clone, PartialEq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}
