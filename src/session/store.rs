//! Session backing stores keyed by the SHA-256 of the raw cookie value.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// Server-side half of a session: the only payload is the bound user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub created_at: i64,
    pub expires_at: i64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session. Returns `false` if the hash is already taken.
    async fn insert(&self, session_hash: &[u8], record: SessionRecord) -> Result<bool>;

    async fn get(&self, session_hash: &[u8]) -> Result<Option<SessionRecord>>;

    /// Remove a session; a missing one is not an error.
    async fn delete(&self, session_hash: &[u8]) -> Result<()>;

    /// Drop sessions that expired before `now`. Returns how many were removed.
    async fn purge_expired(&self, now: i64) -> Result<u64>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session_hash: &[u8], record: SessionRecord) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session_hash) {
            return Ok(false);
        }
        sessions.insert(session_hash.to_vec(), record);
        Ok(true)
    }

    async fn get(&self, session_hash: &[u8]) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.lock().await.get(session_hash).copied())
    }

    async fn delete(&self, session_hash: &[u8]) -> Result<()> {
        self.sessions.lock().await.remove(session_hash);
        Ok(())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.expires_at > now);
        Ok(u64::try_from(before - sessions.len()).unwrap_or(0))
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session_hash: &[u8], record: SessionRecord) -> Result<bool> {
        let query = r"
            INSERT INTO user_sessions (session_hash, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_hash) DO NOTHING
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let done = sqlx::query(query)
            .bind(session_hash)
            .bind(record.user_id)
            .bind(record.created_at)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        Ok(done.rows_affected() == 1)
    }

    async fn get(&self, session_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT user_id, created_at, expires_at
            FROM user_sessions
            WHERE session_hash = $1
            LIMIT 1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(session_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        let Some(row) = row else {
            return Ok(None);
        };
        // A row that does not decode is treated as no session at all.
        match record_from_row(&row) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!("discarding undecodable session row: {err}");
                Ok(None)
            }
        }
    }

    async fn delete(&self, session_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM user_sessions WHERE session_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE expires_at <= $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let done = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired sessions")?;
        Ok(done.rows_affected())
    }
}

fn record_from_row(row: &PgRow) -> Result<SessionRecord, sqlx::Error> {
    Ok(SessionRecord {
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}
