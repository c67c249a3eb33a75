//! Principal profile model.

use crate::model::record::{
    opt_timestamp, optional, required, BackendTimestamp, Record, RecordResult,
};
use chrono::{DateTime, Utc};
use serde_json::json;

/// Authenticated identity issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable unique id issued by the provider.
    pub id: String,
    pub display_name: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Profile record kept per principal in the `users` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub signed_on: bool,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Builds a fresh signed-on profile for `principal`.
    pub fn for_principal(principal: &Principal, now: DateTime<Utc>) -> Self {
        Self {
            id: principal.id.clone(),
            display_name: principal.display_name.clone(),
            signed_on: true,
            updated_at: now,
        }
    }

    /// Decodes a stored profile; `principal` fills fields older records lack.
    pub fn from_record(principal: &Principal, record: &Record) -> RecordResult<Self> {
        Ok(Self {
            id: required(record, "id")?,
            display_name: optional(record, "displayName")?
                .unwrap_or_else(|| principal.display_name.clone()),
            signed_on: optional(record, "userSignedOn")?.unwrap_or(true),
            updated_at: opt_timestamp(record, "updatedAt")?.unwrap_or_else(Utc::now),
        })
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("id".into(), json!(self.id));
        record.insert("displayName".into(), json!(self.display_name));
        record.insert("userSignedOn".into(), json!(self.signed_on));
        record.insert(
            "updatedAt".into(),
            BackendTimestamp::from_datetime(self.updated_at).to_value(),
        );
        record
    }
}
