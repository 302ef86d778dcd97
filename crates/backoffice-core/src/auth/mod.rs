//! Authentication state: durable credential storage and token expiry checks.
//!
//! This module provides:
//! - `CredentialStore`: merge-on-write storage of the bearer credential pair,
//!   session metadata and the persisted session blob
//! - `KeyValueStore` backends: in-memory, JSON file, OS keychain
//! - `token`: JWT expiry decoding and session-expiry rules

pub mod credentials;
pub mod storage;
pub mod token;

pub use credentials::{Credential, CredentialStore, PersistedSession, SessionMetadata};
pub use storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore, StorageError};
