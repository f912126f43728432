use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Access/refresh bearer tokens issued together by login, registration or renewal.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Backend user identifiers arrive either as integers or strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(id) => write!(f, "{id}"),
            UserId::Text(id) => f.write_str(id),
        }
    }
}

/// The signed-in account as returned by the `users/me/` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_staff: bool,
    /// Fields the backend sends that this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterCredentials {
    pub email: String,
    pub password: String,
    pub password2: String,
    pub first_name: String,
    pub accept_terms: bool,
}

impl RegisterCredentials {
    pub fn login_credentials(&self) -> LoginCredentials {
        LoginCredentials::new(self.email.clone(), self.password.clone())
    }
}

impl fmt::Debug for RegisterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterCredentials")
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("accept_terms", &self.accept_terms)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ResetPasswordCredentials {
    pub password1: String,
    pub password2: String,
}

impl fmt::Debug for ResetPasswordCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResetPasswordCredentials { .. }")
    }
}

/// Registration answer: the created user, plus tokens when the backend signs the user in directly.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub tokens: Option<CredentialPair>,
    #[serde(flatten)]
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_accepts_numeric_and_string_ids() {
        let numeric: User =
            serde_json::from_value(serde_json::json!({ "id": 42, "email": "a@b.c" })).unwrap();
        assert_eq!(numeric.id, UserId::Number(42));
        let text: User = serde_json::from_value(
            serde_json::json!({ "id": "u-1", "email": "a@b.c", "plan": "pro" }),
        )
        .unwrap();
        assert_eq!(text.id.to_string(), "u-1");
        assert_eq!(text.extra["plan"], "pro");
    }

    #[test]
    fn register_response_splits_tokens_from_user() {
        let response: RegisterResponse = serde_json::from_value(serde_json::json!({
            "id": 7,
            "email": "new@example.com",
            "first_name": "Ada",
            "tokens": { "access": "A", "refresh": "R" }
        }))
        .unwrap();
        assert_eq!(response.tokens, Some(CredentialPair::new("A", "R")));
        assert_eq!(response.user.first_name, "Ada");
        assert!(!response.user.extra.contains_key("tokens"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", CredentialPair::new("secret-a", "secret-r"));
        assert!(!rendered.contains("secret"));
        let rendered = format!("{:?}", LoginCredentials::new("a@b.c", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
