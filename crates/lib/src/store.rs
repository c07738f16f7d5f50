//! Mailbox store: SQLite-backed, write-once message records with TTL expiry.
//!
//! Expiry is enforced twice: every read carries a `created_at` cutoff so a
//! message past its TTL is never returned, and a periodic sweep (driven by
//! the gateway) deletes expired rows. Eviction is not synchronized with
//! delivery: a message can be pushed live and still drop out of history
//! moments later.

use crate::error::Error;
use crate::message::{InboundMessage, StoredMessage};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        recipient TEXT NOT NULL,
        sender TEXT NOT NULL,
        subject TEXT NOT NULL,
        body_text TEXT NOT NULL,
        body_html TEXT NOT NULL,
        received_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        provider_meta TEXT NOT NULL DEFAULT '{}'
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_recipient_created
        ON messages (recipient, created_at)",
];

#[derive(Debug, Clone, sqlx::FromRow)]
struct MessageRow {
    id: String,
    recipient: String,
    sender: String,
    subject: String,
    body_text: String,
    body_html: String,
    received_at: i64,
    created_at: i64,
    provider_meta: String,
}

impl MessageRow {
    fn into_stored(self) -> StoredMessage {
        StoredMessage {
            id: self.id,
            message: InboundMessage {
                recipient: self.recipient,
                sender: self.sender,
                subject: self.subject,
                body_text: self.body_text,
                body_html: self.body_html,
                received_at: DateTime::from_timestamp_millis(self.received_at)
                    .unwrap_or_default(),
                created_at: DateTime::from_timestamp_millis(self.created_at)
                    .unwrap_or_default(),
                provider_meta: serde_json::from_str(&self.provider_meta).unwrap_or_default(),
            },
        }
    }
}

/// Recipient-partitioned message store. Cheap to clone (pool is Arc-backed).
#[derive(Clone)]
pub struct MailboxStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl MailboxStore {
    /// Open the database (creating file and parent directory if missing) and
    /// apply the schema. Failure here is fatal at startup: the gateway
    /// refuses to serve traffic without a reachable store.
    pub async fn open(path: &Path, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .with_context(|| format!("parsing database path {}", path.display()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts)
            .await
            .with_context(|| format!("opening mailbox database {}", path.display()))?;
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&pool)
                .await
                .context("applying mailbox schema")?;
        }
        Ok(Self { pool, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Oldest `created_at` (unix ms) still visible to reads.
    fn cutoff_millis(&self) -> i64 {
        Utc::now().timestamp_millis() - self.ttl.as_millis() as i64
    }

    /// Persist one message and return its assigned id.
    pub async fn save(&self, msg: &InboundMessage) -> Result<String, Error> {
        let id = format!("msg-{}", Uuid::new_v4());
        let meta = serde_json::to_string(&msg.provider_meta).unwrap_or_else(|_| "{}".to_string());
        sqlx::query(
            "INSERT INTO messages
                (id, recipient, sender, subject, body_text, body_html,
                 received_at, created_at, provider_meta)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&msg.recipient)
        .bind(&msg.sender)
        .bind(&msg.subject)
        .bind(&msg.body_text)
        .bind(&msg.body_html)
        .bind(msg.received_at.timestamp_millis())
        .bind(msg.created_at.timestamp_millis())
        .bind(&meta)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Non-expired messages for one canonical recipient, most-recent-first,
    /// bounded by `limit`.
    pub async fn find_by_address(
        &self,
        addr: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, Error> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, recipient, sender, subject, body_text, body_html,
                    received_at, created_at, provider_meta
             FROM messages
             WHERE recipient = ? AND created_at > ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(addr)
        .bind(self.cutoff_millis())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MessageRow::into_stored).collect())
    }

    /// Delete one message by id. Returns false when it was absent (a normal
    /// negative, not an error).
    pub async fn delete_by_id(&self, id: &str) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count of stored messages still visible to reads (expired rows are
    /// unavailable to every read operation, this one included).
    pub async fn count(&self) -> Result<i64, Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE created_at > ?")
            .bind(self.cutoff_millis())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete every row past the TTL; returns the number removed.
    pub async fn sweep_expired(&self) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM messages WHERE created_at <= ?")
            .bind(self.cutoff_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
