//! libSQL backend: async `StateStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::events::model::{MessageId, StreamKey};
use crate::store::migrations;
use crate::store::traits::{ActorState, StateStore};

const STATE_COLUMNS: &str = "stream_key, pinned_message_id, updated_at";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to an ActorState. Column order matches STATE_COLUMNS.
fn row_to_state(row: &libsql::Row) -> Result<ActorState, DatabaseError> {
    let key: String = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("stream_key: {e}")))?;
    let pinned = match row
        .get_value(1)
        .map_err(|e| DatabaseError::Serialization(format!("pinned_message_id: {e}")))?
    {
        libsql::Value::Integer(id) => Some(MessageId(id)),
        libsql::Value::Null => None,
        other => {
            return Err(DatabaseError::Serialization(format!(
                "pinned_message_id: unexpected value {other:?}"
            )));
        }
    };
    let updated: String = row
        .get(2)
        .map_err(|e| DatabaseError::Serialization(format!("updated_at: {e}")))?;

    Ok(ActorState {
        stream_key: StreamKey::new(key),
        pinned_message_id: pinned,
        updated_at: parse_datetime(&updated),
    })
}

fn opt_message_id(id: Option<MessageId>) -> libsql::Value {
    match id {
        Some(MessageId(id)) => libsql::Value::Integer(id),
        None => libsql::Value::Null,
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl StateStore for LibSqlBackend {
    async fn get_state(&self, key: &StreamKey) -> Result<Option<ActorState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {STATE_COLUMNS} FROM stream_state WHERE stream_key = ?1"),
                params![key.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_state: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_state(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_state: {e}"))),
        }
    }

    async fn put_state(&self, state: &ActorState) -> Result<(), DatabaseError> {
        let updated = state.updated_at.to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO stream_state (stream_key, pinned_message_id, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(stream_key) DO UPDATE SET
                    pinned_message_id = excluded.pinned_message_id,
                    updated_at = excluded.updated_at",
                params![
                    state.stream_key.as_str(),
                    opt_message_id(state.pinned_message_id),
                    updated,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_state: {e}")))?;

        debug!(
            stream_key = %state.stream_key,
            pinned = ?state.pinned_message_id,
            "Stream state saved"
        );
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<ActorState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {STATE_COLUMNS} FROM stream_state ORDER BY stream_key ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_states: {e}")))?;

        let mut states = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => states.push(row_to_state(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_states: {e}"))),
            }
        }
        Ok(states)
    }
}
