use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::auth::AuthError;

/// Body keys consulted, in order, for a human-readable error message.
pub const MESSAGE_KEYS: [&str; 3] = ["detail", "error", "message"];
/// Body key holding errors that are not tied to a single field.
pub const NON_FIELD_ERRORS_KEY: &str = "non_field_errors";

const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";

/// Field name to validation messages, as sent by the backend.
pub type ErrorDetails = BTreeMap<String, Vec<String>>;

/// Errors returned by the request dispatcher.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No response reached the client: DNS, connect, TLS or timeout failures.
    #[error("{message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("missing path parameters for endpoint '{endpoint}': {}", .missing.join(", "))]
    MissingPathParameter {
        endpoint: String,
        missing: Vec<String>,
    },
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),
    #[error("{0}")]
    NotSupported(&'static str),
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("credential store error: {0}")]
    Credentials(#[from] AuthError),
}

impl ApiError {
    pub(crate) fn network(source: reqwest::Error) -> Self {
        ApiError::Network {
            message: NETWORK_ERROR_MESSAGE.to_owned(),
            source: Some(source),
        }
    }

    /// HTTP status of the failure, or 0 when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Http(err) => err.status,
            _ => 0,
        }
    }

    pub fn status_text(&self) -> &str {
        match self {
            ApiError::Http(err) => &err.status_text,
            ApiError::Network { .. } => "Network Error",
            ApiError::NotSupported(_) => "Not Supported",
            _ => "",
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, ApiError::Http(err) if err.is_auth_error())
    }

    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            ApiError::Http(err) => Some(err),
            _ => None,
        }
    }
}

/// Normalized non-2xx response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HttpError {
    pub message: String,
    pub status: u16,
    pub status_text: String,
    pub details: Option<ErrorDetails>,
}

impl HttpError {
    /// Build the error for a failed response from its (possibly absent) JSON body.
    pub fn from_response(status: u16, status_text: impl Into<String>, body: Option<&Value>) -> Self {
        let object = body.and_then(Value::as_object);
        let message = object
            .and_then(extract_message)
            .unwrap_or_else(|| default_message(status).to_owned());
        Self {
            message,
            status,
            status_text: status_text.into(),
            details: object.and_then(extract_details),
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self.status, 401 | 403)
    }

    pub fn is_validation_error(&self) -> bool {
        self.status == 400
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// First message reported for `field`, useful for form validation.
    pub fn field_error(&self, field: &str) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|details| details.get(field))
            .and_then(|messages| messages.first())
            .map(String::as_str)
    }
}

/// Pick the user-facing message out of an error body.
pub fn extract_message(body: &Map<String, Value>) -> Option<String> {
    for key in MESSAGE_KEYS {
        if let Some(text) = body.get(key).and_then(Value::as_str) {
            if !text.is_empty() {
                return Some(text.to_owned());
            }
        }
    }
    body.get(NON_FIELD_ERRORS_KEY)
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Collect per-field validation messages: every key other than the message keys whose value is
/// a string or an array made only of strings.
pub fn extract_details(body: &Map<String, Value>) -> Option<ErrorDetails> {
    let mut details = ErrorDetails::new();
    for (key, value) in body {
        if MESSAGE_KEYS.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::String(text) => {
                details.insert(key.clone(), vec![text.clone()]);
            }
            Value::Array(items) => {
                let messages: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_owned))
                    .collect();
                if let Some(messages) = messages {
                    details.insert(key.clone(), messages);
                }
            }
            _ => {}
        }
    }
    if details.is_empty() {
        None
    } else {
        Some(details)
    }
}

pub fn default_message(status: u16) -> &'static str {
    match status {
        400 => "Invalid request. Please check your input.",
        401 => "You need to be logged in to do this.",
        403 => "You don't have permission to do this.",
        404 => "The requested resource was not found.",
        422 => "Validation error. Please check your input.",
        429 => "Too many requests. Please try again later.",
        500 => "Server error. Please try again later.",
        _ => "An error occurred while processing the request.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_priority_follows_known_keys() {
        let body = json!({ "message": "m", "error": "e", "detail": "d" });
        let err = HttpError::from_response(400, "Bad Request", Some(&body));
        assert_eq!(err.message, "d");

        let body = json!({ "message": "m", "error": "e" });
        assert_eq!(HttpError::from_response(400, "", Some(&body)).message, "e");

        let body = json!({ "non_field_errors": ["Passwords do not match.", "other"] });
        let err = HttpError::from_response(400, "", Some(&body));
        assert_eq!(err.message, "Passwords do not match.");
    }

    #[test]
    fn falls_back_to_status_table() {
        let err = HttpError::from_response(404, "Not Found", None);
        assert_eq!(err.message, "The requested resource was not found.");
        assert!(err.details.is_none());
        assert!(!err.is_auth_error());
        assert!(err.is_not_found());

        let err = HttpError::from_response(418, "", Some(&json!({ "count": 3 })));
        assert_eq!(err.message, "An error occurred while processing the request.");
        assert!(err.details.is_none());
    }

    #[test]
    fn details_keep_only_string_fields() {
        let body = json!({
            "detail": "Invalid input.",
            "email": ["Enter a valid email address."],
            "password": "Too short.",
            "age": 12,
            "nested": { "x": "y" },
            "mixed": ["ok", 1],
            "non_field_errors": ["Try again."]
        });
        let err = HttpError::from_response(400, "Bad Request", Some(&body));
        let details = err.details.clone().unwrap();
        assert_eq!(details.len(), 3);
        assert_eq!(err.field_error("email"), Some("Enter a valid email address."));
        assert_eq!(err.field_error("password"), Some("Too short."));
        assert_eq!(err.field_error("non_field_errors"), Some("Try again."));
        assert!(err.field_error("detail").is_none());
        assert!(err.is_validation_error());
    }

    #[test]
    fn auth_errors_are_401_and_403() {
        assert!(HttpError::from_response(401, "", None).is_auth_error());
        assert!(HttpError::from_response(403, "", None).is_auth_error());
        assert!(!HttpError::from_response(500, "", None).is_auth_error());
        assert!(HttpError::from_response(503, "", None).is_server_error());
    }

    #[test]
    fn network_errors_report_status_zero() {
        let err = ApiError::Network {
            message: NETWORK_ERROR_MESSAGE.into(),
            source: None,
        };
        assert_eq!(err.status(), 0);
        assert_eq!(err.status_text(), "Network Error");
        assert!(!err.is_auth_error());
    }
}
