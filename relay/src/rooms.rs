//! Room membership.
//!
//! A room is named after a session (`identity:secondary`). Each connected
//! client is represented by the sending half of its outbound queue, so a
//! broadcast never waits on a slow socket.

use fleet::types::Envelope;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;

pub type ClientId = u64;
pub type ClientTx = mpsc::UnboundedSender<Envelope>;

#[derive(Default)]
pub struct Rooms {
    rooms: RwLock<HashMap<String, HashMap<ClientId, ClientTx>>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &str, client_id: ClientId, tx: ClientTx) {
        self.rooms
            .write()
            .entry(room.to_string())
            .or_default()
            .insert(client_id, tx);
    }

    pub fn leave(&self, room: &str, client_id: ClientId) {
        let mut rooms = self.rooms.write();
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&client_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Sends the envelope to every member of the room and returns how many
    /// received it. Members whose queue is closed are skipped.
    pub fn broadcast(&self, room: &str, envelope: &Envelope) -> usize {
        let rooms = self.rooms.read();
        let Some(members) = rooms.get(room) else {
            return 0;
        };

        members
            .values()
            .filter(|tx| tx.send(envelope.clone()).is_ok())
            .count()
    }

    pub fn members(&self, room: &str) -> usize {
        self.rooms.read().get(room).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_to_room_members_only() {
        let rooms = Rooms::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        rooms.join("u1:p1", 1, tx1);
        rooms.join("u1:p1", 2, tx2);
        rooms.join("u2:p2", 3, tx3);

        let envelope = Envelope::new("qr", json!({"qr": "ABC"}));
        assert_eq!(rooms.broadcast("u1:p1", &envelope), 2);
        assert_eq!(rx1.try_recv().unwrap(), envelope);
        assert_eq!(rx2.try_recv().unwrap(), envelope);
        assert!(rx3.try_recv().is_err());
        assert_eq!(rooms.broadcast("nobody:here", &envelope), 0);
    }

    #[test]
    fn test_leave_removes_empty_rooms() {
        let rooms = Rooms::new();
        let (tx, rx) = mpsc::unbounded_channel();
        rooms.join("u1:p1", 1, tx.clone());
        rooms.join("u1:p1", 2, tx);
        drop(rx);

        // Closed queues are not counted
        assert_eq!(rooms.broadcast("u1:p1", &Envelope::new("x", json!(null))), 0);

        rooms.leave("u1:p1", 1);
        assert_eq!(rooms.members("u1:p1"), 1);
        rooms.leave("u1:p1", 2);
        assert_eq!(rooms.members("u1:p1"), 0);
        assert!(rooms.rooms.read().is_empty());
    }
}
