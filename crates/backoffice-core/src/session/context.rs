use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::coordinator::{SessionCoordinator, TerminationReason};
use crate::api::auth::LoginOutcome;
use crate::api::ApiError;
use crate::auth::{Credential, SessionMetadata, StorageError};

/// Progress of an explicit logout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum LogoutStatus {
    #[default]
    Idle,
    Pending,
    Completed,
    /// The server call failed; local state was wiped anyway
    RemoteFailed,
}

/// What the view layer needs to know about the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub is_authenticated: bool,
    /// True while an explicit logout is in flight
    pub loading: bool,
    pub logout_status: LogoutStatus,
}

/// Observable session state for the view layer.
pub struct SessionContext {
    coordinator: Arc<SessionCoordinator>,
    state: watch::Sender<SessionState>,
}

impl SessionContext {
    pub fn new(coordinator: Arc<SessionCoordinator>) -> Self {
        let initial = SessionState {
            is_authenticated: Self::derive_authenticated(&coordinator),
            ..Default::default()
        };
        let (state, _) = watch::channel(initial);
        Self { coordinator, state }
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn derive_authenticated(coordinator: &SessionCoordinator) -> bool {
        let store = coordinator.store();
        store.access_token().is_some() && !store.is_session_expired()
    }

    /// Re-derive `is_authenticated` from the credential store.
    pub fn sync(&self) -> bool {
        let authenticated = Self::derive_authenticated(&self.coordinator);
        self.state.send_if_modified(|state| {
            if state.is_authenticated == authenticated {
                return false;
            }
            debug!(authenticated, "Session state changed");
            state.is_authenticated = authenticated;
            true
        });
        authenticated
    }

    /// Keep `is_authenticated` in step with the credential store.
    ///
    /// Runs until the store is dropped; spawn it next to the view layer.
    pub async fn watch_credentials(&self) {
        let mut changes = self.coordinator.store().subscribe();
        while changes.changed().await.is_ok() {
            self.sync();
        }
    }

    /// Persist a freshly issued credential and mark the session authenticated.
    pub fn login(&self, credential: &Credential, metadata: SessionMetadata) -> Result<(), StorageError> {
        let store = self.coordinator.store();
        store.set(credential)?;
        store.set_metadata(&metadata)?;
        self.state.send_modify(|state| {
            state.is_authenticated = true;
            state.logout_status = LogoutStatus::Idle;
        });
        Ok(())
    }

    /// Authenticate against the login endpoint and start a session.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<LoginOutcome, ApiError> {
        let outcome = self.coordinator.auth().login(username, password).await?;
        let store = self.coordinator.store();
        store.clear()?;
        store.set_persisted_session(&outcome.session)?;
        self.login(&outcome.credential, outcome.metadata)?;
        Ok(outcome)
    }

    /// Revoke the session remotely (best effort) and wipe local state.
    pub async fn logout(&self) -> LogoutStatus {
        self.state.send_modify(|state| {
            state.loading = true;
            state.logout_status = LogoutStatus::Pending;
        });

        let credential = self.coordinator.store().get();
        let status = match self
            .coordinator
            .auth()
            .logout(
                credential.access_token.as_deref(),
                credential.refresh_token.as_deref(),
            )
            .await
        {
            Ok(()) => {
                info!("Logged out");
                LogoutStatus::Completed
            }
            Err(e) => {
                warn!(error = %e, "Remote logout failed, clearing local session anyway");
                LogoutStatus::RemoteFailed
            }
        };

        self.coordinator.end_session(TerminationReason::Logout);
        self.state.send_modify(|state| {
            state.is_authenticated = false;
            state.loading = false;
            state.logout_status = status;
        });
        status
    }
}
