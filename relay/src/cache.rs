// Latest QR and pairing code per room, replayed to clients that join late.
// Entries are bounded by count and expire after a TTL; this is never a source
// of truth, a miss only means the client waits for the next push.
use crate::config::ArtifactCacheConfig;
use crate::metrics_defs::{ARTIFACT_REPLAYS, ARTIFACTS_RECORDED};
use fleet::types::Envelope;
use moka::sync::Cache;
use serde_json::{Value, json};
use shared::counter;

pub const QR_EVENT: &str = "qr";
pub const PAIRING_CODE_EVENT: &str = "pairingCode";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoomArtifacts {
    pub qr: Option<Value>,
    pub pairing_code: Option<Value>,
}

pub struct ArtifactCache {
    cache: Cache<String, RoomArtifacts>,
}

impl ArtifactCache {
    pub fn new(config: &ArtifactCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_rooms)
            .time_to_live(config.ttl())
            .build();

        ArtifactCache { cache }
    }

    /// Records the event if it carries a pairing artifact. Returns whether the
    /// room's entry changed.
    pub fn record(&self, room: &str, envelope: &Envelope) -> bool {
        let (field, value) = match envelope.event.as_str() {
            QR_EVENT => ("qr", envelope.data.get("qr")),
            PAIRING_CODE_EVENT => ("code", envelope.data.get("code")),
            _ => return false,
        };
        let Some(value) = value.filter(|v| !v.is_null()).cloned() else {
            tracing::debug!(room, event = %envelope.event, field, "artifact event without a value");
            return false;
        };

        self.cache
            .entry(room.to_string())
            .and_upsert_with(|existing| {
                let mut artifacts = existing.map(|e| e.into_value()).unwrap_or_default();
                match field {
                    "qr" => artifacts.qr = Some(value),
                    _ => artifacts.pairing_code = Some(value),
                }
                artifacts
            });

        counter!(ARTIFACTS_RECORDED, "event" => envelope.event.clone()).increment(1);
        true
    }

    pub fn get(&self, room: &str) -> Option<RoomArtifacts> {
        self.cache.get(room)
    }

    /// Envelopes to send to a client joining `room`: the QR first, then the
    /// pairing code.
    pub fn replay(&self, room: &str) -> Vec<Envelope> {
        let Some(artifacts) = self.get(room) else {
            return Vec::new();
        };

        let mut envelopes = Vec::with_capacity(2);
        if let Some(qr) = artifacts.qr {
            envelopes.push(Envelope::new(QR_EVENT, json!({ "qr": qr })));
        }
        if let Some(code) = artifacts.pairing_code {
            envelopes.push(Envelope::new(PAIRING_CODE_EVENT, json!({ "code": code })));
        }
        counter!(ARTIFACT_REPLAYS).increment(envelopes.len() as u64);
        envelopes
    }

    /// Drops every room belonging to `identity`. Returns the number removed.
    pub fn purge_identity(&self, identity: &str) -> usize {
        let prefix = format!("{identity}:");
        let rooms: Vec<_> = self
            .cache
            .iter()
            .filter(|(room, _)| room.starts_with(&prefix))
            .map(|(room, _)| room)
            .collect();

        for room in &rooms {
            self.cache.invalidate(room.as_str());
        }
        rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ArtifactCache {
        ArtifactCache::new(&ArtifactCacheConfig::default())
    }

    #[test]
    fn test_record_and_replay_order() {
        let cache = cache();
        assert!(cache.record(
            "u1:p1",
            &Envelope::new(PAIRING_CODE_EVENT, json!({"code": "1234-5678"}))
        ));
        assert!(cache.record("u1:p1", &Envelope::new(QR_EVENT, json!({"qr": "ABC"}))));

        let replay = cache.replay("u1:p1");
        assert_eq!(
            replay,
            vec![
                Envelope::new(QR_EVENT, json!({"qr": "ABC"})),
                Envelope::new(PAIRING_CODE_EVENT, json!({"code": "1234-5678"})),
            ]
        );
        assert!(cache.replay("u2:p2").is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = cache();
        cache.record("u1:p1", &Envelope::new(QR_EVENT, json!({"qr": "first"})));
        cache.record("u1:p1", &Envelope::new(QR_EVENT, json!({"qr": "second"})));

        let artifacts = cache.get("u1:p1").unwrap();
        assert_eq!(artifacts.qr, Some(json!("second")));
        assert_eq!(artifacts.pairing_code, None);
    }

    #[test]
    fn test_other_events_are_not_cached() {
        let cache = cache();
        assert!(!cache.record("u1:p1", &Envelope::new("status", json!({"qr": "ABC"}))));
        assert!(!cache.record("u1:p1", &Envelope::new(QR_EVENT, json!({"other": 1}))));
        assert!(cache.get("u1:p1").is_none());
    }

    #[test]
    fn test_purge_identity() {
        let cache = cache();
        for room in ["u1:p1", "u1:p2", "u10:p1"] {
            cache.record(room, &Envelope::new(QR_EVENT, json!({"qr": room})));
        }

        assert_eq!(cache.purge_identity("u1"), 2);
        assert!(cache.get("u1:p1").is_none());
        assert!(cache.get("u1:p2").is_none());
        assert!(cache.get("u10:p1").is_some());
    }

    #[test]
    fn test_entries_expire() {
        let cache = ArtifactCache::new(&ArtifactCacheConfig {
            max_rooms: 10,
            ttl_secs: 1,
        });
        cache.record("u1:p1", &Envelope::new(QR_EVENT, json!({"qr": "ABC"})));
        assert!(cache.get("u1:p1").is_some());

        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(cache.get("u1:p1").is_none());
    }
}
