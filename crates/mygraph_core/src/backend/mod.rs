//! Document backend contract and implementations.
//!
//! # Responsibility
//! - Define the async contract the item store uses for connection,
//!   authentication and document I/O.
//! - Provide an in-process emulator and a local SQLite document store.
//!
//! # Invariants
//! - Profiles live in `users/{principalId}`.
//! - Items live in `users/{principalId}/items/{itemId}`.
//! - Item writes are full-document overwrites.

use crate::db::DbError;
use crate::model::item::ItemId;
use crate::model::profile::Principal;
use crate::model::record::Record;
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio::sync::watch;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

pub const USERS_COLLECTION: &str = "users";

/// Collection path holding the items of one principal.
pub fn items_collection(principal_id: &str) -> String {
    format!("{USERS_COLLECTION}/{principal_id}/items")
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Transport, auth and storage failures reported by a backend.
#[derive(Debug)]
pub enum BackendError {
    /// Connection could not be established.
    Unavailable(String),
    /// Called before `connect` succeeded.
    NotConnected,
    /// Identity provider refused or aborted the flow.
    Auth(String),
    /// Read/write rejected by the store.
    Storage(String),
    /// Stored document is not a JSON object.
    Codec(String),
    Db(DbError),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "backend unavailable: {message}"),
            Self::NotConnected => write!(f, "backend is not connected"),
            Self::Auth(message) => write!(f, "authentication failed: {message}"),
            Self::Storage(message) => write!(f, "storage request failed: {message}"),
            Self::Codec(message) => write!(f, "stored document is unreadable: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for BackendError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Hosted document store with an attached identity provider.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Short name used in log events.
    fn name(&self) -> &'static str;

    /// Establishes the connection. Idempotent once it succeeded.
    async fn connect(&self) -> BackendResult<()>;

    /// Observes sign-in/sign-out transitions; `None` means signed out.
    fn auth_state(&self) -> watch::Receiver<Option<Principal>>;

    /// Runs the interactive sign-in flow and returns the principal.
    async fn sign_in(&self) -> BackendResult<Principal>;

    async fn sign_out(&self) -> BackendResult<()>;

    async fn get_profile(&self, principal_id: &str) -> BackendResult<Option<Record>>;

    async fn put_profile(&self, principal_id: &str, record: &Record) -> BackendResult<()>;

    /// Fetches the whole item collection of a principal in one request.
    async fn fetch_items(&self, principal_id: &str) -> BackendResult<Vec<(ItemId, Record)>>;

    /// Overwrites one item document.
    async fn put_item(
        &self,
        principal_id: &str,
        item_id: &ItemId,
        record: &Record,
    ) -> BackendResult<()>;
}
