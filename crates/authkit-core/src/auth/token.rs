//! Expiry inspection for opaque bearer tokens.
//!
//! Tokens are JWT-shaped (`header.payload.signature`). Only the `exp` claim of the payload is
//! read; signatures are never checked because the client holds no key. Every predicate here
//! fails safe: a token that cannot be decoded counts as expired.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::AuthError;

/// Window before expiry in which an access token is renewed ahead of use.
pub fn default_renewal_horizon() -> Duration {
    Duration::minutes(5)
}

/// Read the `exp` claim of a token.
pub fn decode_expiry(token: &str) -> Result<DateTime<Utc>, AuthError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_), Some(payload)) if !payload.is_empty() => payload,
        _ => return Err(AuthError::MalformedToken("missing payload segment".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| AuthError::MalformedToken(format!("payload is not base64url: {err}")))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|err| AuthError::MalformedToken(format!("payload is not JSON: {err}")))?;

    let exp = match claims.get("exp") {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value.floor() as i64)),
        _ => None,
    }
    .ok_or_else(|| AuthError::MalformedToken("missing numeric exp claim".into()))?;

    DateTime::<Utc>::from_timestamp(exp, 0)
        .ok_or_else(|| AuthError::MalformedToken(format!("exp claim {exp} out of range")))
}

pub fn is_expiring_soon(token: &str, horizon: Duration) -> bool {
    is_expiring_soon_at(token, horizon, Utc::now())
}

/// True when the token expires within `horizon` of `now`, or cannot be decoded.
pub fn is_expiring_soon_at(token: &str, horizon: Duration, now: DateTime<Utc>) -> bool {
    match decode_expiry(token) {
        Ok(expiry) => expiry - now <= horizon,
        Err(_) => true,
    }
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

/// True when the token's expiry is at or before `now`, or the token cannot be decoded.
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match decode_expiry(token) {
        Ok(expiry) => expiry <= now,
        Err(_) => true,
    }
}
