use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AuthError, User};

/// Identity providers whose tokens the backend accepts in exchange for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Apple,
}

impl OAuthProvider {
    /// Logical endpoint name of the provider-specific login call.
    pub fn endpoint_name(self) -> &'static str {
        match self {
            OAuthProvider::Google => "auth.google",
            OAuthProvider::Apple => "auth.apple",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Apple => "apple",
        };
        write!(f, "{value}")
    }
}

impl FromStr for OAuthProvider {
    type Err = InvalidProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "apple" => Ok(OAuthProvider::Apple),
            other => Err(InvalidProvider(other.to_owned())),
        }
    }
}

/// Error reported when parsing an unsupported provider name.
#[derive(Debug, thiserror::Error)]
#[error("unsupported OAuth provider '{0}'")]
pub struct InvalidProvider(pub String);

/// Result of a provider sign-in: an opaque identity token plus whatever profile data the
/// provider disclosed (Apple only shares names on first consent).
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderToken {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ProviderToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }
}

impl fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderToken")
            .field("token", &"<redacted>")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Backend answer to a provider login.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderLogin {
    pub access: String,
    pub refresh: String,
    pub user: User,
}

/// Runs the provider's own sign-in handshake. Treated as a black box by the session.
#[async_trait]
pub trait OAuthBridge: Send + Sync {
    async fn sign_in(&self, provider: OAuthProvider) -> Result<ProviderToken, AuthError>;
}
