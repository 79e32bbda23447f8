// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

pub const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are an AI assistant that helps people find information.";

pub const DEFAULT_MODEL_NAME: &str = "gpt-35-turbo";

/// api-version for the plain chat completions endpoint.
pub const DEFAULT_API_VERSION: &str = "2023-03-15-preview";

/// api-version for the extensions (data source) endpoint.
pub const DEFAULT_PREVIEW_API_VERSION: &str = "2023-06-01-preview";

pub const DEFAULT_TEMPERATURE: f64 = 0.0;
pub const DEFAULT_TOP_P: f64 = 1.0;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

pub const DEFAULT_SEARCH_TOP_K: u32 = 5;
pub const DEFAULT_SEMANTIC_CONFIGURATION: &str = "default";

/// Deadline for connecting and receiving upstream response headers.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Maximum silence between upstream chunks while streaming.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
