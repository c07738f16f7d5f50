//! Live connection table: per-connection senders for outbound frames.

use crate::dispatch::ClientSink;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Frames buffered per connection; a member that falls this far behind
/// loses pushes instead of stalling delivery to siblings.
const CONNECTION_BUFFER_SIZE: usize = 64;

/// Registry of live WebSocket connections. Each socket task drains its own
/// receiver; pushes from other tasks go through the bounded sender, so one
/// slow client never blocks the dispatcher or its room-mates.
pub struct Connections {
    inner: Arc<RwLock<HashMap<String, mpsc::Sender<String>>>>,
}

impl Default for Connections {
    fn default() -> Self {
        Self::new()
    }
}

impl Connections {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a connection; returns the receiver its socket task drains.
    pub async fn register(&self, conn_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        self.inner.write().await.insert(conn_id.to_string(), tx);
        rx
    }

    /// Drop a connection's sender; later pushes to it fail per-connection.
    pub async fn unregister(&self, conn_id: &str) {
        self.inner.write().await.remove(conn_id);
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl ClientSink for Connections {
    async fn push(&self, conn_id: &str, frame: String) -> Result<(), String> {
        let tx = {
            let g = self.inner.read().await;
            g.get(conn_id).cloned()
        };
        let Some(tx) = tx else {
            return Err(format!("connection {} is gone", conn_id));
        };
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                format!("connection {} is lagging, frame dropped", conn_id)
            }
            mpsc::error::TrySendError::Closed(_) => format!("connection {} closed", conn_id),
        })
    }
}
