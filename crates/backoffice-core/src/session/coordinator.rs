//! Credential attachment and single-flight token refresh.
//!
//! Every request goes through [`SessionCoordinator::execute`]. A 401 on an
//! ordinary endpoint starts a refresh, or, when one is already running, parks
//! the request in a FIFO queue until that refresh settles. Only one refresh
//! call is ever in flight; every parked request is replayed once with the new
//! access token, or rejected with the refresh error.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::routes::{redirect_to_login, same_path, Navigator, SessionRoutes};
use crate::api::auth::{AuthClient, AuthEndpoints};
use crate::api::transport::{ApiRequest, ApiResponse, Transport};
use crate::api::ApiError;
use crate::auth::{token, CredentialStore};

/// Body field a server sets to force the user through a password change
const FORCED_RESET_FIELD: &str = "passwordForceful";

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The refresh endpoint itself answered 401
    RefreshRejected,
    /// A public endpoint answered 401
    PublicRouteRejected,
    /// The refresh call failed or timed out
    RefreshFailed,
    /// A successful response carried the forced password reset signal
    ForcedPasswordReset,
    /// Explicit logout
    Logout,
}

/// A request parked until the in-flight refresh settles.
struct Waiter {
    request: ApiRequest,
    completion: oneshot::Sender<Result<ApiRequest, ApiError>>,
}

impl Waiter {
    fn resume(self, access_token: &str) {
        let mut request = self.request;
        let result = request.set_bearer(access_token).map(|()| request);
        // The caller may have given up; nothing to do then.
        let _ = self.completion.send(result);
    }

    fn reject(self, error: ApiError) {
        let _ = self.completion.send(Err(error));
    }
}

#[derive(Default)]
struct RefreshState {
    in_progress: bool,
    waiters: VecDeque<Waiter>,
}

enum Slot {
    Leader(ApiRequest),
    Waiting(oneshot::Receiver<Result<ApiRequest, ApiError>>),
}

/// Ends a refresh: clears the in-progress flag and hands back the queue.
///
/// If the leading future is dropped before settling, the guard settles on its
/// behalf and rejects every waiter with [`ApiError::RefreshAborted`].
struct RefreshGuard<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl RefreshGuard<'_> {
    fn settle(mut self) -> VecDeque<Waiter> {
        self.settled = true;
        take_waiters(self.state)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = take_waiters(self.state);
        warn!(waiters = waiters.len(), "Token refresh abandoned");
        for waiter in waiters {
            waiter.reject(ApiError::RefreshAborted);
        }
    }
}

fn lock_state(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_waiters(state: &Mutex<RefreshState>) -> VecDeque<Waiter> {
    let mut state = lock_state(state);
    state.in_progress = false;
    std::mem::take(&mut state.waiters)
}

fn unauthorized(request: &ApiRequest) -> ApiError {
    ApiError::Unauthorized(format!("{} {}", request.method, request.path))
}

/// Whether a response body asks for a forced password change, either at the
/// top level or inside the `data` envelope.
fn signals_forced_reset(body: &Value) -> bool {
    let flagged = |value: &Value| value.get(FORCED_RESET_FIELD).and_then(Value::as_bool) == Some(true);
    flagged(body) || body.get("data").is_some_and(flagged)
}

/// Attaches credentials to requests and heals expired sessions.
///
/// One instance per session; share it behind an `Arc`.
pub struct SessionCoordinator {
    transport: Arc<dyn Transport>,
    auth: AuthClient,
    store: Arc<CredentialStore>,
    routes: SessionRoutes,
    navigator: Arc<dyn Navigator>,
    refresh_timeout: Option<Duration>,
    state: Mutex<RefreshState>,
}

impl SessionCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: AuthEndpoints,
        store: Arc<CredentialStore>,
        routes: SessionRoutes,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            auth: AuthClient::new(Arc::clone(&transport), endpoints),
            transport,
            store,
            routes,
            navigator,
            refresh_timeout: None,
            state: Mutex::new(RefreshState::default()),
        }
    }

    /// Give up on a refresh call after `timeout`. `None` waits indefinitely.
    pub fn with_refresh_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    pub fn is_refreshing(&self) -> bool {
        lock_state(&self.state).in_progress
    }

    /// Number of requests parked behind the in-flight refresh.
    pub fn waiting_requests(&self) -> usize {
        lock_state(&self.state).waiters.len()
    }

    /// Send `request` with the session's credential.
    ///
    /// Statuses other than 401 come back as `Ok` unchanged. A 401 is healed
    /// by one refresh and one replay when possible; otherwise the result is
    /// [`ApiError::Unauthorized`] or the refresh error.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.attach_credential(&mut request)?;
        let response = self.transport.send(&request).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(self.inspect(response));
        }

        let replay = self.recover(request).await?;
        debug!(method = %replay.method, path = %replay.path, "Replaying request");
        let response = self.transport.send(&replay).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            warn!(path = %replay.path, "Replayed request rejected again");
            return Err(unauthorized(&replay));
        }
        Ok(self.inspect(response))
    }

    /// Refresh ahead of time when the access token is about to expire.
    ///
    /// Returns `Ok(true)` when a refresh ran. Does nothing while another
    /// refresh is in flight.
    pub async fn refresh_if_due(&self) -> Result<bool, ApiError> {
        let credential = self.store.get();
        let (Some(access_token), Some(_)) = (credential.access_token, credential.refresh_token)
        else {
            return Ok(false);
        };
        if !token::should_preemptively_refresh(&access_token) {
            return Ok(false);
        }
        {
            let mut state = lock_state(&self.state);
            if state.in_progress {
                return Ok(false);
            }
            state.in_progress = true;
        }
        debug!("Access token close to expiry, refreshing early");
        self.drive_refresh().await?;
        Ok(true)
    }

    /// Wipe local session state and send the view layer to the login route.
    pub fn end_session(&self, reason: TerminationReason) {
        info!(?reason, "Ending session");
        if let Err(e) = self.store.clear() {
            error!(error = %e, "Failed to clear session storage");
        }
        redirect_to_login(self.navigator.as_ref(), &self.routes);
    }

    /// Caller-supplied `Authorization` headers are left alone.
    fn attach_credential(&self, request: &mut ApiRequest) -> Result<(), ApiError> {
        if request.has_authorization() {
            return Ok(());
        }
        if let Some(access_token) = self.store.access_token() {
            request.set_bearer(&access_token)?;
        }
        Ok(())
    }

    fn inspect(&self, response: ApiResponse) -> ApiResponse {
        if response.is_success()
            && signals_forced_reset(&response.body)
            && !self.store.metadata().password_forceful
        {
            warn!("Server requested a forced password reset");
            self.end_session(TerminationReason::ForcedPasswordReset);
        }
        response
    }

    /// Turn a 401 into a re-authorized request, or a final error.
    async fn recover(&self, mut request: ApiRequest) -> Result<ApiRequest, ApiError> {
        if same_path(&request.path, &self.auth.endpoints().refresh) {
            warn!("Refresh endpoint rejected the session");
            self.end_session(TerminationReason::RefreshRejected);
            return Err(unauthorized(&request));
        }
        if self.routes.is_public(&request.path) {
            warn!(path = %request.path, "Public endpoint answered 401");
            self.end_session(TerminationReason::PublicRouteRejected);
            return Err(unauthorized(&request));
        }
        if request.is_retried() {
            return Err(unauthorized(&request));
        }
        request.mark_retried();

        match self.join_refresh(request) {
            Slot::Leader(mut request) => {
                let access_token = self.drive_refresh().await?;
                request.set_bearer(&access_token)?;
                Ok(request)
            }
            Slot::Waiting(completion) => completion.await.unwrap_or(Err(ApiError::RefreshAborted)),
        }
    }

    /// Become the refresh leader, or queue behind the refresh in flight.
    fn join_refresh(&self, request: ApiRequest) -> Slot {
        let mut state = lock_state(&self.state);
        if !state.in_progress {
            state.in_progress = true;
            return Slot::Leader(request);
        }
        debug!(path = %request.path, queued = state.waiters.len() + 1, "Waiting on token refresh");
        let (completion, receiver) = oneshot::channel();
        state.waiters.push_back(Waiter {
            request,
            completion,
        });
        Slot::Waiting(receiver)
    }

    /// Run the refresh as leader; the in-progress flag must already be set.
    async fn drive_refresh(&self) -> Result<String, ApiError> {
        let guard = RefreshGuard {
            state: &self.state,
            settled: false,
        };

        match self.refresh_credential().await {
            Ok(access_token) => {
                let waiters = guard.settle();
                info!(waiters = waiters.len(), "Token refreshed");
                for waiter in waiters {
                    waiter.resume(&access_token);
                }
                Ok(access_token)
            }
            Err(err) => {
                warn!(error = %err, "Token refresh failed");
                self.end_session(TerminationReason::RefreshFailed);
                let waiters = guard.settle();
                for waiter in waiters {
                    waiter.reject(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Exchange the stored refresh token and persist the result.
    async fn refresh_credential(&self) -> Result<String, ApiError> {
        let refresh_token = self
            .store
            .refresh_token()
            .ok_or(ApiError::MissingRefreshToken)?;

        let refreshed = match self.refresh_timeout {
            Some(limit) => tokio::time::timeout(limit, self.auth.refresh(&refresh_token))
                .await
                .map_err(|_| ApiError::RefreshTimedOut(limit))??,
            None => self.auth.refresh(&refresh_token).await?,
        };

        self.store.set(&refreshed)?;
        refreshed
            .access_token
            .or_else(|| self.store.access_token())
            .ok_or_else(|| {
                ApiError::InvalidResponse("Refresh response did not include an access token".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signals_forced_reset() {
        assert!(signals_forced_reset(&json!({ "passwordForceful": true })));
        assert!(signals_forced_reset(&json!({ "data": { "passwordForceful": true } })));
        assert!(!signals_forced_reset(&json!({ "data": { "passwordForceful": false } })));
        assert!(!signals_forced_reset(&json!({ "passwordForceful": "yes" })));
        assert!(!signals_forced_reset(&json!([1, 2, 3])));
        assert!(!signals_forced_reset(&Value::Null));
    }

    #[test]
    fn test_dropped_guard_rejects_waiters() {
        let state = Mutex::new(RefreshState {
            in_progress: true,
            waiters: VecDeque::new(),
        });
        let (completion, mut receiver) = oneshot::channel();
        lock_state(&state).waiters.push_back(Waiter {
            request: ApiRequest::get("/products"),
            completion,
        });

        drop(RefreshGuard {
            state: &state,
            settled: false,
        });

        assert!(!lock_state(&state).in_progress);
        assert_eq!(receiver.try_recv().unwrap().unwrap_err(), ApiError::RefreshAborted);
    }

    #[test]
    fn test_waiter_resume_rewrites_bearer() {
        let (completion, mut receiver) = oneshot::channel();
        let mut request = ApiRequest::get("/menus");
        request.set_bearer("stale").unwrap();
        Waiter {
            request,
            completion,
        }
        .resume("fresh");

        let replay = receiver.try_recv().unwrap().unwrap();
        assert_eq!(replay.bearer_token(), Some("fresh"));
        assert_eq!(replay.path, "/menus");
    }
}
