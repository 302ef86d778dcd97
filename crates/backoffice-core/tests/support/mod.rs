#![allow(dead_code)]

//! Scripted transport and wiring helpers shared by the integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use backoffice_core::api::{ApiError, ApiRequest, ApiResponse, AuthEndpoints, Transport};
use backoffice_core::auth::{Credential, CredentialStore};
use backoffice_core::session::{MemoryNavigator, PublicRoutes, SessionCoordinator, SessionRoutes};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::watch;

pub const REFRESH_PATH: &str = "/auth/refresh-token";
pub const LOGIN_ROUTE: &str = "/login";
pub const START_ROUTE: &str = "/dashboard";

/// Unsigned JWT whose `exp` claim is `expires_at`.
pub fn jwt(expires_at: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD
        .encode(json!({ "sub": "admin", "exp": expires_at.timestamp() }).to_string());
    format!("{header}.{payload}.sig")
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

/// How the refresh endpoint answers.
#[derive(Debug, Clone, Copy)]
pub enum RefreshBehavior {
    /// Issue `access-N` and `refresh-N`
    Rotate,
    /// Issue `access-N` only; the refresh token is left out
    AccessOnly,
    Fail(StatusCode),
}

struct Inner {
    valid_token: String,
    behavior: RefreshBehavior,
    issued: usize,
    refresh_calls: usize,
    overrides: HashMap<String, (StatusCode, Value)>,
    requests: Vec<Recorded>,
}

/// In-process backend.
///
/// Ordinary paths answer 200 when the bearer matches the currently valid
/// token and 401 otherwise, unless an override is registered for the path.
/// The refresh endpoint can be held open with [`MockTransport::hold_refresh`].
pub struct MockTransport {
    inner: Mutex<Inner>,
    gate: watch::Sender<bool>,
}

impl MockTransport {
    pub fn new(valid_token: &str) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Mutex::new(Inner {
                valid_token: valid_token.to_string(),
                behavior: RefreshBehavior::Rotate,
                issued: 0,
                refresh_calls: 0,
                overrides: HashMap::new(),
                requests: Vec::new(),
            }),
            gate,
        }
    }

    pub fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        self.inner.lock().unwrap().behavior = behavior;
    }

    pub fn respond(&self, path: &str, status: StatusCode, body: Value) {
        self.inner
            .lock()
            .unwrap()
            .overrides
            .insert(path.to_string(), (status, body));
    }

    /// Park every refresh call until [`MockTransport::release_refresh`].
    pub fn hold_refresh(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_refresh(&self) {
        self.gate.send_replace(true);
    }

    pub fn refresh_calls(&self) -> usize {
        self.inner.lock().unwrap().refresh_calls
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    fn record(&self, request: &ApiRequest) {
        self.inner.lock().unwrap().requests.push(Recorded {
            method: request.method.to_string(),
            path: request.path.clone(),
            bearer: request.bearer_token().map(str::to_string),
            body: request.body.clone(),
        });
    }

    async fn refresh(&self) -> ApiResponse {
        self.inner.lock().unwrap().refresh_calls += 1;

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut inner = self.inner.lock().unwrap();
        let behavior = inner.behavior;
        match behavior {
            RefreshBehavior::Fail(status) => {
                ApiResponse::new(status, json!({ "message": "refresh rejected" }))
            }
            RefreshBehavior::Rotate | RefreshBehavior::AccessOnly => {
                inner.issued += 1;
                let access = format!("access-{}", inner.issued);
                inner.valid_token = access.clone();
                let mut body = json!({ "accessToken": access });
                if matches!(behavior, RefreshBehavior::Rotate) {
                    body["refreshToken"] = json!(format!("refresh-{}", inner.issued));
                    body["refreshTokenExpiry"] =
                        json!((Utc::now() + Duration::days(7)).timestamp_millis());
                }
                ApiResponse::new(StatusCode::OK, json!({ "data": body }))
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.record(request);
        if request.path == REFRESH_PATH {
            return Ok(self.refresh().await);
        }

        let inner = self.inner.lock().unwrap();
        if let Some((status, body)) = inner.overrides.get(&request.path) {
            return Ok(ApiResponse::new(*status, body.clone()));
        }
        if request.bearer_token() == Some(inner.valid_token.as_str()) {
            Ok(ApiResponse::new(StatusCode::OK, json!({ "path": request.path })))
        } else {
            Ok(ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                json!({ "message": "token expired" }),
            ))
        }
    }
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub store: Arc<CredentialStore>,
    pub navigator: Arc<MemoryNavigator>,
    pub coordinator: Arc<SessionCoordinator>,
}

impl Harness {
    /// Coordinator over a [`MockTransport`] accepting `valid_token`, with
    /// `credential` already stored.
    pub fn new(valid_token: &str, credential: Credential) -> Self {
        Self::with_timeout(valid_token, credential, None)
    }

    pub fn with_timeout(
        valid_token: &str,
        credential: Credential,
        refresh_timeout: Option<std::time::Duration>,
    ) -> Self {
        let transport = Arc::new(MockTransport::new(valid_token));
        let store = Arc::new(CredentialStore::in_memory());
        store.set(&credential).unwrap();
        let navigator = Arc::new(MemoryNavigator::new(START_ROUTE));
        let routes = SessionRoutes::new(
            LOGIN_ROUTE,
            PublicRoutes::new(["/auth/login", "/auth/password/*"]).into_predicate(),
        );
        let coordinator = SessionCoordinator::new(
            transport.clone(),
            AuthEndpoints::default(),
            store.clone(),
            routes,
            navigator.clone(),
        )
        .with_refresh_timeout(refresh_timeout);

        Self {
            transport,
            store,
            navigator,
            coordinator: Arc::new(coordinator),
        }
    }

    pub fn redirected_to_login(&self) -> bool {
        self.navigator.history().last().map(String::as_str) == Some(LOGIN_ROUTE)
    }
}

/// Credential with a stale access token and a week-long refresh token.
pub fn stale_credential() -> Credential {
    Credential::new("stale", "refresh-0", Utc::now() + Duration::days(7))
}

/// Yield to other tasks until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
