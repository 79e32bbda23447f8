// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Resolves `${VAR}` and `${VAR:-fallback}` references from the environment.
///
/// A bare `${VAR}` that is not set is an error. The `:-` form substitutes the
/// fallback (possibly empty) when the variable is unset or empty, which lets
/// optional settings such as the search service collapse to "disabled".
/// Malformed references (no closing brace, empty name) are kept literally.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

pub(crate) fn resolve_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return Ok(result);
        };

        let reference = &after[..end];
        let (name, fallback) = match reference.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (reference, None),
        };

        if name.is_empty() {
            result.push_str(&rest[start..start + 2 + end + 1]);
        } else {
            let value = lookup(name).filter(|v| fallback.is_none() || !v.is_empty());
            match (value, fallback) {
                (Some(v), _) => result.push_str(&v),
                (None, Some(fb)) => result.push_str(fb),
                (None, None) => {
                    return Err(ConfigError::UndefinedVariable {
                        name: name.to_string(),
                    })
                }
            }
        }

        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}
