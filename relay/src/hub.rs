//! State shared by every relay connection: the fleet handle, room
//! membership and the artifact cache.

use crate::cache::ArtifactCache;
use crate::config::Config;
use crate::metrics_defs::BACKEND_EVENTS;
use crate::rooms::{ClientId, Rooms};
use fleet::Fleet;
use fleet::types::{Envelope, SessionKey};
use serde::Deserialize;
use shared::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Payload of `backend-event`, sent by backends that push instead of
/// holding a socket.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendEvent {
    #[serde(flatten)]
    pub key: SessionKey,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

pub struct RelayHub {
    fleet: Fleet,
    cache: ArtifactCache,
    rooms: Rooms,
    backend_path: String,
    reconnect_delay: Duration,
    next_client_id: AtomicU64,
}

impl RelayHub {
    pub fn new(fleet: Fleet, config: &Config) -> Self {
        RelayHub {
            fleet,
            cache: ArtifactCache::new(&config.artifact_cache),
            rooms: Rooms::new(),
            backend_path: config.backend_path.clone(),
            reconnect_delay: config.reconnect_delay(),
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn rooms(&self) -> &Rooms {
        &self.rooms
    }

    pub fn backend_path(&self) -> &str {
        &self.backend_path
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn next_client_id(&self) -> ClientId {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Caches the event if it is a pairing artifact and broadcasts it to the
    /// room. Returns the number of clients reached.
    pub fn publish(&self, room: &str, envelope: Envelope) -> usize {
        self.cache.record(room, &envelope);
        let delivered = self.rooms.broadcast(room, &envelope);
        tracing::debug!(room, event = %envelope.event, delivered, "published event");
        delivered
    }

    pub fn ingest_backend_event(&self, event: BackendEvent) -> usize {
        counter!(BACKEND_EVENTS, "event" => event.event.clone()).increment(1);
        let room = event.key.room();
        self.publish(&room, Envelope::new(event.event, event.payload))
    }
}
