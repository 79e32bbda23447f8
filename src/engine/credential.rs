// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

// Upstream API key resolution

use std::sync::Arc;

use crate::config::{CredentialConfig, Secret};
use crate::proxy::RelayError;

/// Resolves the upstream API key for each request.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self) -> Result<Secret, RelayError>;
}

/// Key fixed at config load.
pub struct StaticCredential {
    key: Secret,
}

impl StaticCredential {
    pub fn new(key: Secret) -> Self {
        Self { key }
    }
}

impl CredentialSource for StaticCredential {
    fn api_key(&self) -> Result<Secret, RelayError> {
        Ok(self.key.clone())
    }
}

/// Key read from an environment variable on every call, so a rotated key
/// takes effect without a restart.
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialSource for EnvCredential {
    fn api_key(&self) -> Result<Secret, RelayError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.is_empty() => Ok(Secret::new(value)),
            _ => Err(RelayError::Credential(format!(
                "environment variable '{}' is not set",
                self.var
            ))),
        }
    }
}

pub fn credential_from_config(config: &CredentialConfig) -> Arc<dyn CredentialSource> {
    match config {
        CredentialConfig::Static(key) => Arc::new(StaticCredential::new(key.clone())),
        CredentialConfig::Env(var) => Arc::new(EnvCredential::new(var.clone())),
    }
}
