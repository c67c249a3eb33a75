//! Local SQLite document backend.
//!
//! # Responsibility
//! - Persist profile and item documents as JSON bodies in one SQLite file.
//! - Act as a single-principal identity provider for local sessions.
//!
//! # Invariants
//! - Blocking SQLite work runs on the tokio blocking pool, never on the
//!   async executor threads.
//! - Documents of one collection are returned in write order.

use crate::backend::{items_collection, Backend, BackendError, BackendResult, USERS_COLLECTION};
use crate::db::{open_db, open_db_in_memory};
use crate::model::item::ItemId;
use crate::model::profile::Principal;
use crate::model::record::Record;
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use once_cell::sync::OnceCell;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite-backed document store bound to one local principal.
pub struct SqliteBackend {
    location: Location,
    principal: Principal,
    conn: OnceCell<Arc<Mutex<Connection>>>,
    auth_tx: watch::Sender<Option<Principal>>,
}

impl SqliteBackend {
    /// Backend over a database file, created on `connect` when missing.
    pub fn open(path: impl Into<PathBuf>, principal: Principal) -> Self {
        Self::with_location(Location::File(path.into()), principal)
    }

    /// Backend over a private in-memory database.
    pub fn in_memory(principal: Principal) -> Self {
        Self::with_location(Location::Memory, principal)
    }

    fn with_location(location: Location, principal: Principal) -> Self {
        let (auth_tx, _) = watch::channel(None);
        Self {
            location,
            principal,
            conn: OnceCell::new(),
            auth_tx,
        }
    }

    fn require_connected(&self) -> BackendResult<&Arc<Mutex<Connection>>> {
        self.conn.get().ok_or(BackendError::NotConnected)
    }

    async fn with_conn<T, F>(&self, op: &'static str, work: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> BackendResult<T> + Send + 'static,
    {
        let conn = Arc::clone(self.require_connected()?);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| BackendError::Storage(format!("{op}: connection lock poisoned")))?;
            work(&guard)
        })
        .await
        .map_err(|err| BackendError::Storage(format!("{op}: blocking task failed: {err}")))?
    }

    async fn get_document(
        &self,
        collection: String,
        doc_id: String,
    ) -> BackendResult<Option<Record>> {
        self.with_conn("get_document", move |conn| {
            let body = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2;",
                    params![collection, doc_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            body.map(|text| decode_body(&text)).transpose()
        })
        .await
    }

    async fn put_document(
        &self,
        collection: String,
        doc_id: String,
        record: &Record,
    ) -> BackendResult<()> {
        let body = serde_json::to_string(record)
            .map_err(|err| BackendError::Codec(format!("cannot encode document: {err}")))?;
        let written_at = Utc::now().timestamp_millis();
        self.with_conn("put_document", move |conn| {
            conn.execute(
                "INSERT INTO documents (collection, doc_id, body, written_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (collection, doc_id)
                 DO UPDATE SET body = excluded.body, written_at = excluded.written_at;",
                params![collection, doc_id, body, written_at],
            )?;
            Ok(())
        })
        .await
    }
}

fn decode_body(text: &str) -> BackendResult<Record> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(other) => Err(BackendError::Codec(format!(
            "expected JSON object, got `{other}`"
        ))),
        Err(err) => Err(BackendError::Codec(err.to_string())),
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(&self) -> BackendResult<()> {
        if self.conn.get().is_some() {
            return Ok(());
        }

        let location = self.location.clone();
        let opened = tokio::task::spawn_blocking(move || match location {
            Location::File(path) => open_db(path),
            Location::Memory => open_db_in_memory(),
        })
        .await
        .map_err(|err| BackendError::Unavailable(format!("open task failed: {err}")))?;

        match opened {
            Ok(conn) => {
                // A concurrent connect may have won; either connection is valid.
                let _ = self.conn.set(Arc::new(Mutex::new(conn)));
                info!("event=backend_connect module=backend status=ok backend=sqlite");
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=backend_connect module=backend status=error backend=sqlite error={err}"
                );
                Err(BackendError::Unavailable(err.to_string()))
            }
        }
    }

    fn auth_state(&self) -> watch::Receiver<Option<Principal>> {
        self.auth_tx.subscribe()
    }

    async fn sign_in(&self) -> BackendResult<Principal> {
        self.require_connected()?;
        self.auth_tx.send_replace(Some(self.principal.clone()));
        Ok(self.principal.clone())
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.require_connected()?;
        self.auth_tx.send_replace(None);
        Ok(())
    }

    async fn get_profile(&self, principal_id: &str) -> BackendResult<Option<Record>> {
        self.get_document(USERS_COLLECTION.to_string(), principal_id.to_string())
            .await
    }

    async fn put_profile(&self, principal_id: &str, record: &Record) -> BackendResult<()> {
        self.put_document(
            USERS_COLLECTION.to_string(),
            principal_id.to_string(),
            record,
        )
        .await
    }

    async fn fetch_items(&self, principal_id: &str) -> BackendResult<Vec<(ItemId, Record)>> {
        let collection = items_collection(principal_id);
        self.with_conn("fetch_items", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT doc_id, body
                 FROM documents
                 WHERE collection = ?1
                 ORDER BY written_at ASC, doc_id ASC;",
            )?;
            let mut rows = stmt.query([collection])?;
            let mut documents = Vec::new();
            while let Some(row) = rows.next()? {
                let doc_id: String = row.get(0)?;
                let body: String = row.get(1)?;
                documents.push((ItemId::from_stored(doc_id), decode_body(&body)?));
            }
            Ok(documents)
        })
        .await
    }

    async fn put_item(
        &self,
        principal_id: &str,
        item_id: &ItemId,
        record: &Record,
    ) -> BackendResult<()> {
        self.put_document(
            items_collection(principal_id),
            item_id.as_str().to_string(),
            record,
        )
        .await
    }
}
