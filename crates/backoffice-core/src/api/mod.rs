//! REST API client module for the backoffice admin API.
//!
//! This module provides the HTTP `Transport` abstraction, the `AuthClient`
//! for the login/refresh/logout endpoints, and `CatalogApi` for the product
//! and menu CRUD calls made through the session coordinator.
//!
//! The API uses JWT bearer token authentication with refresh tokens.

pub mod auth;
pub mod catalog;
pub mod error;
pub mod transport;

pub use auth::{AuthClient, AuthEndpoints, LoginOutcome};
pub use catalog::CatalogApi;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
