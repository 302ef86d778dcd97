//! Expiry checks for bearer credentials.
//!
//! Access tokens are JWTs whose payload is decoded without signature
//! verification; only the `exp` claim is read. Anything that cannot be decoded
//! is treated as expired.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::credentials::Credential;

/// Refresh ahead of expiry when less than this many seconds remain (5 minutes)
const TOKEN_REFRESH_BUFFER_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<f64>,
}

/// Read the `exp` claim of a JWT, if the token decodes and carries one.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.exp?;
    if !exp.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((exp * 1000.0) as i64)
}

/// Whether `token` is expired.
///
/// With an explicit expiry the token itself is not decoded.
pub fn is_expired(token: &str, explicit_expiry: Option<DateTime<Utc>>) -> bool {
    let expiry = match explicit_expiry {
        Some(expiry) => expiry,
        None => match decode_expiry(token) {
            Some(expiry) => expiry,
            None => return true,
        },
    };
    Utc::now() >= expiry
}

/// Whether `token` expires within the refresh buffer.
pub fn should_preemptively_refresh(token: &str) -> bool {
    match decode_expiry(token) {
        Some(expiry) => expiry - Utc::now() < Duration::seconds(TOKEN_REFRESH_BUFFER_SECS),
        None => true,
    }
}

/// Whether the session behind `credential` can no longer be recovered.
///
/// An unexpired refresh token keeps the session alive even when the access
/// token has lapsed, since the access token can always be refreshed.
pub fn is_session_expired(credential: &Credential) -> bool {
    let Some(access_token) = credential.access_token.as_deref() else {
        return true;
    };

    match (
        credential.refresh_token.as_deref(),
        credential.refresh_token_expiry,
    ) {
        (Some(refresh_token), Some(expiry)) => is_expired(refresh_token, Some(expiry)),
        _ => is_expired(access_token, None),
    }
}

#[cfg(test)]
pub(crate) fn test_jwt(expires_at: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": "admin", "exp": expires_at.timestamp() }).to_string(),
    );
    format!("{header}.{payload}.signature")
}
