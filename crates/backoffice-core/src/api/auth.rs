//! Calls to the authentication endpoints: login, token refresh and logout.
//!
//! These go straight to the transport and never through the session
//! coordinator, so a failing refresh cannot recursively trigger another one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::transport::{ApiRequest, Transport};
use super::ApiError;
use crate::auth::{Credential, PersistedSession, SessionMetadata};

/// Paths of the authentication endpoints, relative to the API base URL.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            refresh: "/auth/refresh-token".to_string(),
            logout: "/auth/logout".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    refresh_token_expiry: Option<DateTime<Utc>>,
}

impl From<TokenPayload> for Credential {
    fn from(payload: TokenPayload) -> Self {
        Credential {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            refresh_token_expiry: payload.refresh_token_expiry,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    refresh_token_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    password_forceful: bool,
    #[serde(default)]
    profile_complete: bool,
    #[serde(default)]
    user: serde_json::Value,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Everything the login endpoint hands back.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub credential: Credential,
    pub metadata: SessionMetadata,
    pub session: PersistedSession,
}

/// Client for the authentication endpoints.
#[derive(Clone)]
pub struct AuthClient {
    transport: Arc<dyn Transport>,
    endpoints: AuthEndpoints,
}

impl AuthClient {
    pub fn new(transport: Arc<dyn Transport>, endpoints: AuthEndpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// Exchange a refresh token for a new credential pair.
    ///
    /// Fields the server leaves out come back as `None`, so merging the result
    /// into the store keeps their previous values.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credential, ApiError> {
        let request = ApiRequest::post(self.endpoints.refresh.as_str())
            .with_body(&RefreshRequest { refresh_token })?;

        let response = self.transport.send(&request).await?.error_for_status()?;
        let payload: TokenPayload = response.data()?;
        debug!(
            access = payload.access_token.is_some(),
            refresh = payload.refresh_token.is_some(),
            "Token refresh succeeded"
        );
        Ok(payload.into())
    }

    /// Authenticate with username and password.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, ApiError> {
        let request = ApiRequest::post(self.endpoints.login.as_str())
            .with_body(&json!({ "username": username, "password": password }))?;

        let response = self.transport.send(&request).await?.error_for_status()?;
        let payload: LoginPayload = response.data()?;
        let credential = Credential {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            refresh_token_expiry: payload.refresh_token_expiry,
        };
        if credential.access_token.is_none() {
            return Err(ApiError::InvalidResponse(
                "Login response did not include an access token".to_string(),
            ));
        }

        info!(username, "Login succeeded");
        Ok(LoginOutcome {
            credential,
            metadata: SessionMetadata {
                password_forceful: payload.password_forceful,
                profile_complete: payload.profile_complete,
            },
            session: PersistedSession {
                user: payload.user,
                permissions: payload.permissions,
                groups: payload.groups,
            },
        })
    }

    /// Tell the server to revoke the session.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), ApiError> {
        let body = match refresh_token {
            Some(token) => json!({ "refreshToken": token }),
            None => json!({}),
        };
        let mut request = ApiRequest::post(self.endpoints.logout.as_str()).with_body(&body)?;
        if let Some(token) = access_token {
            request.set_bearer(token)?;
        }

        self.transport.send(&request).await?.error_for_status()?;
        Ok(())
    }
}
