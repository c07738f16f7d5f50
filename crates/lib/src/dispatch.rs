//! Delivery dispatcher: fan persisted messages out to room members and
//! replay stored history to a connection when it joins.

use crate::address;
use crate::error::Error;
use crate::gateway::protocol;
use crate::message::{MessageRecord, StoredMessage};
use crate::rooms::RoomRegistry;
use crate::store::MailboxStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Per-connection push capability. The dispatcher never sees the concrete
/// transport; anything that can deliver one JSON frame to one connection
/// qualifies (the gateway's connection table in production, a recording
/// sink in tests).
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn push(&self, conn_id: &str, frame: String) -> Result<(), String>;
}

pub struct Dispatcher {
    rooms: Arc<RoomRegistry>,
    store: Arc<MailboxStore>,
    sink: Arc<dyn ClientSink>,
    history_limit: usize,
}

impl Dispatcher {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        store: Arc<MailboxStore>,
        sink: Arc<dyn ClientSink>,
        history_limit: usize,
    ) -> Self {
        Self {
            rooms,
            store,
            sink,
            history_limit,
        }
    }

    /// Fan one persisted message out to the current members of its room.
    /// At-most-once: a failed push is logged and isolated to that member;
    /// no subscribers means no work and no error.
    pub async fn on_ingested(&self, stored: &StoredMessage) {
        let addr = match address::normalize(&stored.message.recipient) {
            Ok(a) => a,
            Err(_) => {
                log::warn!("dispatch: message {} has an empty recipient, dropping", stored.id);
                return;
            }
        };
        let members = self.rooms.members_of(&addr).await;
        if members.is_empty() {
            log::debug!("dispatch: no subscribers for {}", addr);
            return;
        }
        let record = MessageRecord::from_stored(stored, self.store.ttl());
        let frame = protocol::new_message_event(&addr, &record);
        for conn_id in members {
            if let Err(e) = self.sink.push(&conn_id, frame.clone()).await {
                log::warn!("dispatch: push to {} failed: {}", conn_id, e);
            }
        }
    }

    /// Record membership, then replay stored history (most-recent-first,
    /// possibly empty) to the joining connection alone. The store read
    /// happens after the registry lock is released. Returns the canonical
    /// address joined.
    pub async fn on_join(&self, conn_id: &str, addr: &str) -> Result<String, Error> {
        let addr = self.rooms.join(conn_id, addr).await?;
        let history = self.store.find_by_address(&addr, self.history_limit).await?;
        let records: Vec<MessageRecord> = history
            .iter()
            .map(|m| MessageRecord::from_stored(m, self.store.ttl()))
            .collect();
        let frame = protocol::history_event(&addr, &records);
        if let Err(e) = self.sink.push(conn_id, frame).await {
            log::warn!("dispatch: history push to {} failed: {}", conn_id, e);
        }
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::InboundMessage;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Records every push; fails (after recording the attempt) for
    /// connections listed as dead.
    struct RecordingSink {
        frames: Mutex<Vec<(String, String)>>,
        dead: Vec<String>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                dead: Vec::new(),
            })
        }

        fn with_dead(dead: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                dead: dead.iter().map(|s| s.to_string()).collect(),
            })
        }

        async fn frames_for(&self, conn_id: &str) -> Vec<serde_json::Value> {
            self.frames
                .lock()
                .await
                .iter()
                .filter(|(c, _)| c == conn_id)
                .map(|(_, f)| serde_json::from_str(f).expect("frame is JSON"))
                .collect()
        }
    }

    #[async_trait]
    impl ClientSink for RecordingSink {
        async fn push(&self, conn_id: &str, frame: String) -> Result<(), String> {
            self.frames
                .lock()
                .await
                .push((conn_id.to_string(), frame));
            if self.dead.iter().any(|d| d == conn_id) {
                return Err("connection closed".to_string());
            }
            Ok(())
        }
    }

    async fn temp_store() -> Arc<MailboxStore> {
        let dir = std::env::temp_dir().join(format!("mailroom-dispatch-test-{}", Uuid::new_v4()));
        Arc::new(
            MailboxStore::open(&dir.join("mailbox.db"), Duration::from_secs(3600))
                .await
                .expect("open store"),
        )
    }

    fn inbound(recipient: &str, subject: &str) -> InboundMessage {
        InboundMessage {
            recipient: recipient.to_string(),
            sender: "sender@example.com".to_string(),
            subject: subject.to_string(),
            body_text: "body".to_string(),
            body_html: String::new(),
            received_at: Utc::now(),
            created_at: Utc::now(),
            provider_meta: serde_json::Map::new(),
        }
    }

    async fn save(store: &MailboxStore, msg: &InboundMessage) -> StoredMessage {
        let id = store.save(msg).await.expect("save");
        StoredMessage {
            id,
            message: msg.clone(),
        }
    }

    #[tokio::test]
    async fn delivers_only_to_members_of_the_matching_room() {
        let rooms = Arc::new(RoomRegistry::new());
        let store = temp_store().await;
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(rooms.clone(), store.clone(), sink.clone(), 50);

        rooms.join("c1", "a@inbox.test").await.unwrap();
        rooms.join("c2", "b@inbox.test").await.unwrap();

        let stored = save(&store, &inbound("a@inbox.test", "for a")).await;
        dispatcher.on_ingested(&stored).await;

        let c1 = sink.frames_for("c1").await;
        assert_eq!(c1.len(), 1);
        assert_eq!(c1[0]["event"], "message.new");
        assert_eq!(c1[0]["payload"]["message"]["subject"], "for a");
        assert!(sink.frames_for("c2").await.is_empty());
    }

    #[tokio::test]
    async fn no_subscribers_means_no_pushes_and_no_error() {
        let rooms = Arc::new(RoomRegistry::new());
        let store = temp_store().await;
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(rooms, store.clone(), sink.clone(), 50);

        let stored = save(&store, &inbound("nobody@inbox.test", "unheard")).await;
        dispatcher.on_ingested(&stored).await;
        assert!(sink.frames.lock().await.is_empty());
    }

    #[tokio::test]
    async fn join_replays_history_newest_first_then_live_pushes_follow() {
        let rooms = Arc::new(RoomRegistry::new());
        let store = temp_store().await;
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(rooms, store.clone(), sink.clone(), 50);

        let mut m1 = inbound("a@inbox.test", "m1");
        m1.created_at = Utc::now() - chrono::Duration::seconds(10);
        m1.received_at = m1.created_at;
        save(&store, &m1).await;
        save(&store, &inbound("a@inbox.test", "m2")).await;

        let canonical = dispatcher.on_join("c1", "A@Inbox.Test").await.unwrap();
        assert_eq!(canonical, "a@inbox.test");

        let m3 = save(&store, &inbound("a@inbox.test", "m3")).await;
        dispatcher.on_ingested(&m3).await;

        let frames = sink.frames_for("c1").await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["event"], "message.history");
        let history = frames[0]["payload"]["messages"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["subject"], "m2");
        assert_eq!(history[1]["subject"], "m1");
        assert_eq!(frames[1]["event"], "message.new");
        assert_eq!(frames[1]["payload"]["message"]["subject"], "m3");
    }

    #[tokio::test]
    async fn join_on_empty_mailbox_replays_empty_history() {
        let rooms = Arc::new(RoomRegistry::new());
        let store = temp_store().await;
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(rooms, store, sink.clone(), 50);

        dispatcher.on_join("c1", "fresh@inbox.test").await.unwrap();
        let frames = sink.frames_for("c1").await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "message.history");
        assert!(frames[0]["payload"]["messages"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dead_member_does_not_stall_siblings() {
        let rooms = Arc::new(RoomRegistry::new());
        let store = temp_store().await;
        let sink = RecordingSink::with_dead(&["dead"]);
        let dispatcher = Dispatcher::new(rooms.clone(), store.clone(), sink.clone(), 50);

        rooms.join("dead", "a@inbox.test").await.unwrap();
        rooms.join("alive", "a@inbox.test").await.unwrap();

        let stored = save(&store, &inbound("a@inbox.test", "hello")).await;
        dispatcher.on_ingested(&stored).await;

        assert_eq!(sink.frames_for("alive").await.len(), 1);
    }

    #[tokio::test]
    async fn disconnected_member_is_not_delivered_to() {
        let rooms = Arc::new(RoomRegistry::new());
        let store = temp_store().await;
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(rooms.clone(), store.clone(), sink.clone(), 50);

        rooms.join("c1", "a@inbox.test").await.unwrap();
        rooms.join("c1", "b@inbox.test").await.unwrap();
        rooms.join("c2", "a@inbox.test").await.unwrap();
        rooms.disconnect("c1").await;

        let stored = save(&store, &inbound("a@inbox.test", "after")).await;
        dispatcher.on_ingested(&stored).await;

        assert!(sink.frames_for("c1").await.is_empty());
        assert_eq!(sink.frames_for("c2").await.len(), 1);
    }
}
