//! Room registry: canonical address → set of live subscriber connections.
//!
//! The registry owns its own synchronization and is injected wherever
//! membership is read or mutated; nothing else touches the maps. A reverse
//! index (connection → joined addresses) makes whole-connection disconnect
//! cheap. Rooms with zero members are pruned immediately, so the map size
//! always equals the number of actively-watched addresses.

use crate::address;
use crate::error::Error;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Opaque connection identifier assigned by the transport.
pub type ConnId = String;

#[derive(Default)]
struct Membership {
    /// canonical address -> member connections
    rooms: HashMap<String, HashSet<ConnId>>,
    /// connection -> addresses it joined (for disconnect)
    joined: HashMap<ConnId, HashSet<String>>,
}

pub struct RoomRegistry {
    inner: Arc<RwLock<Membership>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Membership::default())),
        }
    }

    /// Add `conn_id` to the room for `addr`, creating the room if absent.
    /// Idempotent. Returns the canonical address joined.
    pub async fn join(&self, conn_id: &str, addr: &str) -> Result<String, Error> {
        let addr = address::normalize(addr)?;
        let mut g = self.inner.write().await;
        g.rooms
            .entry(addr.clone())
            .or_default()
            .insert(conn_id.to_string());
        g.joined
            .entry(conn_id.to_string())
            .or_default()
            .insert(addr.clone());
        Ok(addr)
    }

    /// Remove `conn_id` from `addr`'s room only, pruning the room when it
    /// empties. Returns false when the address or member was absent.
    pub async fn leave(&self, conn_id: &str, addr: &str) -> Result<bool, Error> {
        let addr = address::normalize(addr)?;
        let mut g = self.inner.write().await;
        let removed = g
            .rooms
            .get_mut(&addr)
            .map_or(false, |members| members.remove(conn_id));
        if !removed {
            return Ok(false);
        }
        let prune_room = g.rooms.get(&addr).map_or(false, |m| m.is_empty());
        if prune_room {
            g.rooms.remove(&addr);
        }
        if let Some(addrs) = g.joined.get_mut(conn_id) {
            addrs.remove(&addr);
        }
        let prune_conn = g.joined.get(conn_id).map_or(false, |a| a.is_empty());
        if prune_conn {
            g.joined.remove(conn_id);
        }
        Ok(true)
    }

    /// Remove `conn_id` from every room it belongs to, pruning emptied
    /// rooms. Idempotent. Returns the addresses the connection left.
    pub async fn disconnect(&self, conn_id: &str) -> Vec<String> {
        let mut g = self.inner.write().await;
        let Some(addrs) = g.joined.remove(conn_id) else {
            return Vec::new();
        };
        let mut left = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if let Some(members) = g.rooms.get_mut(&addr) {
                members.remove(conn_id);
            }
            let prune = g.rooms.get(&addr).map_or(false, |m| m.is_empty());
            if prune {
                g.rooms.remove(&addr);
            }
            left.push(addr);
        }
        left
    }

    /// Snapshot of the members of `addr`'s room. Expects the canonical form.
    pub async fn members_of(&self, addr: &str) -> Vec<ConnId> {
        let g = self.inner.read().await;
        g.rooms
            .get(addr)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of addresses with at least one live subscriber.
    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}
