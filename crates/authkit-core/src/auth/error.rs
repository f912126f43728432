use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by token decoding and credential management routines.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("no OAuth bridge configured for provider sign-in")]
    OAuthUnavailable,
    #[error("OAuth provider sign-in failed: {0}")]
    ProviderSignIn(String),
}
