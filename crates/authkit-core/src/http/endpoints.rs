use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use super::ApiError;

const DEFAULT_AUTH_ENDPOINTS: &[(&str, &str)] = &[
    ("auth.register", "users/register/"),
    ("auth.getUser", "users/me/"),
    ("auth.login", "users/token/"),
    ("auth.refreshToken", "users/token/refresh/"),
    ("auth.forgotPassword", "users/forgot-password/"),
    ("auth.resetPassword", "users/reset-password/<user_id>/<token>/"),
    ("auth.google", "users/auth/google/"),
    ("auth.apple", "users/auth/apple/"),
];

/// Maps logical endpoint names such as `auth.login` to path templates.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    paths: HashMap<String, String>,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        let paths = DEFAULT_AUTH_ENDPOINTS
            .iter()
            .map(|(name, path)| ((*name).to_owned(), (*path).to_owned()))
            .collect();
        Self { paths }
    }
}

impl EndpointRegistry {
    pub fn empty() -> Self {
        Self {
            paths: HashMap::new(),
        }
    }

    /// Register or override the path template for `name`.
    pub fn with(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.paths.insert(name.into(), path.into());
        self
    }

    pub fn resolve(&self, name: &str) -> Result<&str, ApiError> {
        self.paths
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ApiError::UnknownEndpoint(name.to_owned()))
    }
}

/// Substitute `<name>` placeholders in `template` with values from `params`.
///
/// Parameters without a matching placeholder are ignored with a warning; placeholders left
/// without a value fail with [`ApiError::MissingPathParameter`].
pub fn expand_path(template: &str, params: &BTreeMap<String, String>) -> Result<String, ApiError> {
    let mut path = template.to_owned();
    for (key, value) in params {
        let placeholder = format!("<{key}>");
        if path.contains(&placeholder) {
            path = path.replace(&placeholder, value);
        } else {
            warn!(endpoint = template, param = %key, "unused path parameter");
        }
    }

    let missing = placeholders(&path);
    if !missing.is_empty() {
        return Err(ApiError::MissingPathParameter {
            endpoint: template.to_owned(),
            missing,
        });
    }
    Ok(path)
}

/// `<...>` placeholders remaining in `path`. Anything between angle brackets that does not span a
/// path segment counts.
fn placeholders(path: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        match after.find('>') {
            Some(end) => {
                let name = &after[..end];
                if !name.is_empty() && !name.contains(['/', '<']) {
                    found.push(format!("<{name}>"));
                    rest = &after[end + 1..];
                } else {
                    rest = after;
                }
            }
            None => break,
        }
    }
    found
}
