//! Backoffice core library.
//!
//! Session handling for the backoffice admin client: durable credential
//! storage, JWT expiry checks, a single-flight token refresh coordinator and
//! the typed catalog API built on top of it.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod session;

pub use api::{ApiError, ApiRequest, ApiResponse, AuthClient, AuthEndpoints, CatalogApi, Transport};
pub use auth::{Credential, CredentialStore, SessionMetadata};
pub use config::Config;
pub use session::{SessionContext, SessionCoordinator, SessionState};
