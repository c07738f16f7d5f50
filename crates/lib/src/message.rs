//! Canonical inbound message and the client-facing record shape.
//!
//! `InboundMessage` is produced by the payload adapter and is immutable once
//! persisted; `StoredMessage` adds the store-assigned id. `MessageRecord` is
//! the stable wire shape served to clients (history queries and WebSocket
//! pushes), independent of storage internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sender value when a payload carries no usable `from`.
pub const UNKNOWN_SENDER: &str = "unknown";

/// Subject value when a payload carries no subject (or an empty one).
pub const NO_SUBJECT: &str = "(no subject)";

/// One inbound email, normalized across provider payload shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Canonical (lowercase, trimmed) recipient, the partition key.
    pub recipient: String,
    pub sender: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    /// Assigned at ingestion.
    pub received_at: DateTime<Utc>,
    /// Expiry anchor; equals `received_at` unless explicitly overridden.
    pub created_at: DateTime<Utc>,
    /// Opaque provider fields (message id, timestamp, signature, envelope…)
    /// kept for audit only.
    #[serde(default)]
    pub provider_meta: serde_json::Map<String, serde_json::Value>,
}

/// A persisted message: canonical fields plus the store-assigned id.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub message: InboundMessage,
}

/// Client-facing record: message id, addresses, bodies, and the computed
/// expiry time (`createdAt + ttl`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub received_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn from_stored(stored: &StoredMessage, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            id: stored.id.clone(),
            to: stored.message.recipient.clone(),
            from: stored.message.sender.clone(),
            subject: stored.message.subject.clone(),
            text: stored.message.body_text.clone(),
            html: stored.message.body_html.clone(),
            received_at: stored.message.received_at,
            expires_at: stored.message.created_at + ttl,
        }
    }
}
