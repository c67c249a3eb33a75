//! Item domain model.
//!
//! # Responsibility
//! - Define the canonical item record persisted per principal.
//! - Convert items to and from backend documents with a per-field default table.
//! - Apply the parked-state expiry rule at read time.
//!
//! # Invariants
//! - `id` never changes after construction; locally created ids are never
//!   empty and backend ids are kept exactly as stored.
//! - A state read never reports `Parked` once `parked_until` has passed.
//! - Only `headline`, `notes`, `createdAt` and `updatedAt` are mandatory in
//!   stored records; every other field has a documented default.

use crate::model::record::{
    opt_integer, opt_timestamp, optional, req_timestamp, required, BackendTimestamp, Record,
    RecordResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const SHORT_HEADLINE_CHARS: usize = 20;
const SHORT_HEADLINE_MARKER: &str = "...";

/// Opaque item identifier.
///
/// Locally generated ids are UUID v4 text; ids read from a backend are kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(String);

impl ItemId {
    /// Generates a fresh UUID v4 id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a document id read from a backend, byte for byte.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Keeps a non-empty caller-supplied id, or generates one when `value`
    /// is blank. Used for local creation only.
    pub fn from_existing_or_new(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Self::generate()
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discriminator for viewable entities. Only content items are persisted.
///
/// Item enums are stored by variant name (`"Item"`, `"Parked"`, `"Public"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Item,
}

/// Scheduling state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ItemState {
    #[default]
    Active,
    /// Hidden until `parked_until`, then reported as `Active`.
    Parked,
    Archived,
    Done,
}

impl ItemState {
    /// Pure expiry rule: a parked state past its deadline reads as active.
    pub fn effective(
        state: ItemState,
        parked_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ItemState {
        if state == ItemState::Parked && now > parked_until {
            ItemState::Active
        } else {
            state
        }
    }
}

/// Visibility of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Privacy {
    Public,
    Community,
    Personal,
    Private,
}

/// User-authored item with display and scheduling attributes.
///
/// `state` is private so every read goes through the expiry rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    id: ItemId,
    pub kind: ItemKind,
    pub headline: String,
    pub notes: String,
    pub priority: i64,
    state: ItemState,
    pub parked_until: DateTime<Utc>,
    pub sentiment: f64,
    pub override_sentiment: bool,
    pub privacy: Privacy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Creates a new item with a generated id, stamped with the current time.
    pub fn new(headline: impl Into<String>) -> Self {
        Self::new_at(headline, Utc::now())
    }

    /// Creates a new item with a generated id, stamped with `now`.
    ///
    /// # Invariants
    /// - `state` starts as `Active`, `privacy` as `Personal`.
    /// - `created_at == updated_at == parked_until == now`.
    pub fn new_at(headline: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::with_id("", headline, now)
    }

    /// Creates an item with a caller-provided id; a blank id is replaced with
    /// a generated one.
    pub fn with_id(id: &str, headline: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ItemId::from_existing_or_new(id),
            kind: ItemKind::Item,
            headline: headline.into(),
            notes: String::new(),
            priority: 0,
            state: ItemState::Active,
            parked_until: now,
            sentiment: 0.0,
            override_sentiment: false,
            privacy: Privacy::Personal,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reconstructs an item from a stored record, using the current time for
    /// a missing `parkedUntil`.
    pub fn from_record(id: &ItemId, record: &Record) -> RecordResult<Self> {
        Self::from_record_at(id, record, Utc::now())
    }

    /// Reconstructs an item from a stored record.
    ///
    /// Defaults for absent fields: `type` Item, `priority` 0, `state` Active,
    /// `parkedUntil` `now`, `sentiment` 0, `overrideSentiment` false,
    /// `privacy` Public.
    ///
    /// # Errors
    /// - `MissingField` when `headline`, `notes`, `createdAt` or `updatedAt`
    ///   is absent.
    /// - `InvalidField` when a present field has the wrong type or an
    ///   unknown enum value.
    pub fn from_record_at(id: &ItemId, record: &Record, now: DateTime<Utc>) -> RecordResult<Self> {
        let headline = required::<String>(record, "headline")?;
        let notes = required::<String>(record, "notes")?;
        let created_at = req_timestamp(record, "createdAt")?;
        let updated_at = req_timestamp(record, "updatedAt")?;

        Ok(Self {
            id: id.clone(),
            kind: optional(record, "type")?.unwrap_or(ItemKind::Item),
            headline,
            notes,
            priority: opt_integer(record, "priority")?.unwrap_or(0),
            state: optional(record, "state")?.unwrap_or(ItemState::Active),
            parked_until: opt_timestamp(record, "parkedUntil")?.unwrap_or(now),
            sentiment: optional(record, "sentiment")?.unwrap_or(0.0),
            override_sentiment: optional(record, "overrideSentiment")?.unwrap_or(false),
            // Stored records predating the privacy field were publicly visible.
            privacy: optional(record, "privacy")?.unwrap_or(Privacy::Public),
            created_at,
            updated_at,
        })
    }

    /// Serializes every field to the backend document shape.
    ///
    /// The stored `state` is written as held; expiry is not re-derived here.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("headline".into(), json!(self.headline));
        record.insert("notes".into(), json!(self.notes));
        record.insert("type".into(), json!(self.kind));
        record.insert("priority".into(), json!(self.priority));
        record.insert("state".into(), json!(self.state));
        record.insert("parkedUntil".into(), timestamp(self.parked_until));
        record.insert("sentiment".into(), json!(self.sentiment));
        record.insert("overrideSentiment".into(), json!(self.override_sentiment));
        record.insert("privacy".into(), json!(self.privacy));
        record.insert("createdAt".into(), timestamp(self.created_at));
        record.insert("updatedAt".into(), timestamp(self.updated_at));
        record
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    /// Reads the state against the current wall clock.
    pub fn state(&mut self) -> ItemState {
        self.state_at(Utc::now())
    }

    /// Reads the state against `now`, persisting an expired park as `Active`.
    pub fn state_at(&mut self, now: DateTime<Utc>) -> ItemState {
        self.state = ItemState::effective(self.state, self.parked_until, now);
        self.state
    }

    /// Stored state without applying expiry.
    pub fn stored_state(&self) -> ItemState {
        self.state
    }

    pub fn set_state(&mut self, state: ItemState) {
        self.state = state;
    }

    /// Parks the item until `until`.
    pub fn park_until(&mut self, until: DateTime<Utc>) {
        self.state = ItemState::Parked;
        self.parked_until = until;
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Headline truncated to 20 characters, with `...` when truncated.
    pub fn short_headline(&self) -> String {
        let mut short = self
            .headline
            .chars()
            .take(SHORT_HEADLINE_CHARS)
            .collect::<String>();
        if self.headline.chars().count() > SHORT_HEADLINE_CHARS {
            short.push_str(SHORT_HEADLINE_MARKER);
        }
        short
    }
}

fn timestamp(value: DateTime<Utc>) -> Value {
    BackendTimestamp::from_datetime(value).to_value()
}
