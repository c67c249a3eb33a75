//! Item store error taxonomy.

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::model::item::ItemId;
use crate::model::record::RecordError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Connection, auth setup or session reads failed. Fatal to the session.
    BackendUnavailable(BackendError),
    /// Interactive sign-in or sign-out was refused.
    Auth(BackendError),
    /// Write-through failed; in-memory state was left unchanged.
    WriteFailure {
        item_id: ItemId,
        source: BackendError,
    },
    /// A stored item lacks mandatory fields or holds undecodable values.
    MalformedRecord {
        item_id: ItemId,
        source: RecordError,
    },
    /// The stored profile of the principal cannot be decoded.
    MalformedProfile {
        principal_id: String,
        source: RecordError,
    },
    /// The operation needs a signed-in principal.
    NotAuthenticated,
    /// `initialize` has not connected the backend yet.
    NotInitialized,
    AlreadyInitialized,
    ItemNotFound(ItemId),
    Config(ConfigError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BackendUnavailable(err) => write!(f, "backend unavailable: {err}"),
            Self::Auth(err) => write!(f, "{err}"),
            Self::WriteFailure { item_id, source } => {
                write!(f, "write of item {item_id} failed: {source}")
            }
            Self::MalformedRecord { item_id, source } => {
                write!(f, "malformed item record {item_id}: {source}")
            }
            Self::MalformedProfile {
                principal_id,
                source,
            } => write!(f, "malformed profile record {principal_id}: {source}"),
            Self::NotAuthenticated => write!(f, "no principal is signed in"),
            Self::NotInitialized => write!(f, "item store is not initialized"),
            Self::AlreadyInitialized => write!(f, "item store is already initialized"),
            Self::ItemNotFound(item_id) => write!(f, "item not found: {item_id}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::BackendUnavailable(err) | Self::Auth(err) => Some(err),
            Self::WriteFailure { source, .. } => Some(source),
            Self::MalformedRecord { source, .. } | Self::MalformedProfile { source, .. } => {
                Some(source)
            }
            Self::Config(err) => Some(err),
            Self::NotAuthenticated
            | Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::ItemNotFound(_) => None,
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}
