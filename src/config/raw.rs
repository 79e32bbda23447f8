// Raw YAML deserialization types (internal)
// Kept apart from the public Config structs because variable interpolation,
// defaulting and validation happen between the two.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub chatrelay: String,
    pub environment: Option<String>,
    pub stream: Option<bool>,
    pub system_message: Option<String>,
    pub upstream: RawUpstream,
    pub sampling: Option<RawSampling>,
    pub search: Option<RawSearch>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUpstream {
    pub resource: String,
    pub deployment: String,
    pub model_name: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub api_version: Option<String>,
    pub preview_api_version: Option<String>,
    pub forward_authorization: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSampling {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stop: Option<RawList>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSearch {
    pub service: Option<String>,
    pub index: Option<String>,
    pub key: Option<String>,
    pub use_semantic_search: Option<bool>,
    pub semantic_configuration: Option<String>,
    pub top_k: Option<u32>,
    pub in_domain: Option<bool>,
    pub content_columns: Option<RawList>,
    pub title_column: Option<String>,
    pub url_column: Option<String>,
    pub filename_column: Option<String>,
}

/// A list written either as YAML sequence or as one `|`-joined string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawList {
    Joined(String),
    Items(Vec<String>),
}
