// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

use sha2::{Digest, Sha256};

use super::defaults::*;
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a relay config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Resolve `${VAR}` interpolation in string fields
/// 5. Apply defaults and validate
/// 6. Build typed Config
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.chatrelay != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.chatrelay
        )));
    }

    let system_message = match raw.system_message {
        Some(s) => resolve_variables(&s)?,
        None => DEFAULT_SYSTEM_MESSAGE.to_string(),
    };

    let upstream = build_upstream_config(raw.upstream)?;
    let sampling = build_sampling_config(raw.sampling.unwrap_or_default())?;
    let search = raw.search.map(build_search_config).transpose()?.flatten();

    Ok(Config {
        version: raw.chatrelay,
        environment: raw.environment.unwrap_or_default(),
        stream: raw.stream.unwrap_or(true),
        system_message,
        upstream,
        sampling,
        search,
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

fn resolve_opt(value: Option<String>) -> Result<Option<String>, ConfigError> {
    value.map(|v| resolve_variables(&v)).transpose()
}

/// Resolve and drop empty values, so `${VAR:-}` reads as "not set".
fn resolve_non_empty(value: Option<String>) -> Result<Option<String>, ConfigError> {
    Ok(resolve_opt(value)?.filter(|v| !v.trim().is_empty()))
}

fn split_list(list: Option<raw::RawList>) -> Result<Option<Vec<String>>, ConfigError> {
    let items = match list {
        None => return Ok(None),
        Some(raw::RawList::Joined(s)) => resolve_variables(&s)?
            .split('|')
            .map(str::to_string)
            .collect::<Vec<_>>(),
        Some(raw::RawList::Items(items)) => items
            .iter()
            .map(|s| resolve_variables(s))
            .collect::<Result<Vec<_>, _>>()?,
    };
    let items: Vec<String> = items.into_iter().filter(|s| !s.is_empty()).collect();
    Ok(if items.is_empty() { None } else { Some(items) })
}

fn build_upstream_config(raw: raw::RawUpstream) -> Result<UpstreamConfig, ConfigError> {
    let resource = resolve_variables(&raw.resource)?
        .trim()
        .trim_end_matches('/')
        .to_string();
    if resource.is_empty() {
        return Err(ConfigError::Validation(
            "upstream.resource must not be empty".into(),
        ));
    }

    let deployment = resolve_variables(&raw.deployment)?.trim().to_string();
    if deployment.is_empty() {
        return Err(ConfigError::Validation(
            "upstream.deployment must not be empty".into(),
        ));
    }

    let credential = match (resolve_non_empty(raw.api_key)?, raw.api_key_env) {
        (Some(key), None) => CredentialConfig::Static(Secret::new(key)),
        (None, Some(var)) if !var.trim().is_empty() => CredentialConfig::Env(var.trim().to_string()),
        (Some(_), Some(_)) => {
            return Err(ConfigError::Validation(
                "upstream.api_key and upstream.api_key_env are mutually exclusive".into(),
            ))
        }
        _ => {
            return Err(ConfigError::Validation(
                "one of upstream.api_key or upstream.api_key_env is required".into(),
            ))
        }
    };

    let timeout_ms = raw.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    let idle_timeout_ms = raw.idle_timeout_ms.unwrap_or(DEFAULT_IDLE_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "upstream.timeout_ms must be > 0".into(),
        ));
    }
    if idle_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "upstream.idle_timeout_ms must be > 0".into(),
        ));
    }

    Ok(UpstreamConfig {
        resource,
        deployment,
        model_name: resolve_non_empty(raw.model_name)?
            .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
        credential,
        api_version: resolve_non_empty(raw.api_version)?
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        preview_api_version: resolve_non_empty(raw.preview_api_version)?
            .unwrap_or_else(|| DEFAULT_PREVIEW_API_VERSION.to_string()),
        forward_authorization: raw.forward_authorization.unwrap_or(false),
        timeout_ms,
        idle_timeout_ms,
    })
}

fn build_sampling_config(raw: raw::RawSampling) -> Result<SamplingConfig, ConfigError> {
    let temperature = raw.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ConfigError::Validation(format!(
            "sampling.temperature must be in [0.0, 2.0], got {temperature}"
        )));
    }

    let top_p = raw.top_p.unwrap_or(DEFAULT_TOP_P);
    if !(0.0..=1.0).contains(&top_p) {
        return Err(ConfigError::Validation(format!(
            "sampling.top_p must be in [0.0, 1.0], got {top_p}"
        )));
    }

    let max_tokens = raw.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    if max_tokens < 1 {
        return Err(ConfigError::Validation(
            "sampling.max_tokens must be >= 1".into(),
        ));
    }

    Ok(SamplingConfig {
        temperature,
        top_p,
        max_tokens,
        stop: split_list(raw.stop)?,
    })
}

/// Returns `None` when any of service, index or key is missing, which
/// selects the plain completion path.
fn build_search_config(raw: raw::RawSearch) -> Result<Option<SearchConfig>, ConfigError> {
    let service = resolve_non_empty(raw.service)?;
    let index = resolve_non_empty(raw.index)?;
    let key = resolve_non_empty(raw.key)?;

    let (service, index, key) = match (service, index, key) {
        (Some(s), Some(i), Some(k)) => (s, i, k),
        _ => return Ok(None),
    };

    Ok(Some(SearchConfig {
        service,
        index,
        key: Secret::new(key),
        use_semantic_search: raw.use_semantic_search.unwrap_or(false),
        semantic_configuration: resolve_non_empty(raw.semantic_configuration)?
            .unwrap_or_else(|| DEFAULT_SEMANTIC_CONFIGURATION.to_string()),
        top_k: raw.top_k.unwrap_or(DEFAULT_SEARCH_TOP_K),
        in_domain: raw.in_domain.unwrap_or(true),
        content_columns: split_list(raw.content_columns)?.unwrap_or_default(),
        title_column: resolve_non_empty(raw.title_column)?,
        url_column: resolve_non_empty(raw.url_column)?,
        filename_column: resolve_non_empty(raw.filename_column)?,
    }))
}
