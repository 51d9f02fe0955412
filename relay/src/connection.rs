//! One client connection on the relay socket.
//!
//! Lifecycle: connected, then joined to a room, then bound to a backend once
//! the client registers its session, then closed. The reader runs on the
//! connection task; a separate writer drains the client's outbound queue.

use crate::hub::{BackendEvent, RelayHub};
use crate::link::{BackendLink, REGISTER_EVENT};
use crate::metrics_defs::{CONNECTED_CLIENTS, RELAYED_EVENTS};
use crate::rooms::{ClientId, ClientTx};
use fleet::types::{Envelope, SessionKey};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use shared::{counter, gauge};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub const JOIN_EVENT: &str = "join-session-room";
pub const BACKEND_EVENT: &str = "backend-event";
pub const UNAVAILABLE_EVENT: &str = "session-unavailable";
pub const NO_BACKEND_MESSAGE: &str = "No available bot server";

/// Serves a client until its socket closes.
pub async fn serve_client<S>(hub: Arc<RelayHub>, socket: S)
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
{
    let client_id = hub.next_client_id();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if sink.send(Message::Text(envelope.to_json())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    gauge!(CONNECTED_CLIENTS).increment(1.0);
    tracing::debug!(client_id, "relay client connected");

    let mut session = ClientSession::new(hub, client_id, tx);
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match Envelope::from_json(&text) {
                Ok(envelope) => session.handle(envelope).await,
                Err(e) => tracing::debug!(client_id, error = %e, "ignoring malformed client frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(client_id, error = %e, "client read failed");
                break;
            }
        }
    }

    session.close();
    writer.abort();
    gauge!(CONNECTED_CLIENTS).decrement(1.0);
    tracing::debug!(client_id, "relay client disconnected");
}

struct ClientSession {
    hub: Arc<RelayHub>,
    client_id: ClientId,
    tx: ClientTx,
    room: watch::Sender<Option<String>>,
    link: Option<BackendLink>,
}

impl ClientSession {
    fn new(hub: Arc<RelayHub>, client_id: ClientId, tx: ClientTx) -> Self {
        ClientSession {
            hub,
            client_id,
            tx,
            room: watch::Sender::new(None),
            link: None,
        }
    }

    async fn handle(&mut self, envelope: Envelope) {
        match envelope.event.as_str() {
            JOIN_EVENT => match parse_key(&envelope) {
                Some(key) => self.join(key.room()),
                None => tracing::debug!(client_id = self.client_id, "join without a session key"),
            },
            REGISTER_EVENT => match parse_key(&envelope) {
                Some(key) => self.register(key).await,
                None => tracing::debug!(client_id = self.client_id, "register without a session key"),
            },
            BACKEND_EVENT => match serde_json::from_value::<BackendEvent>(envelope.data) {
                Ok(event) => {
                    self.hub.ingest_backend_event(event);
                }
                Err(e) => tracing::debug!(client_id = self.client_id, error = %e, "invalid backend-event"),
            },
            _ => self.forward(envelope),
        }
    }

    fn join(&mut self, room: String) {
        let rooms = self.hub.rooms();
        let previous = self.room.borrow().clone();
        if let Some(previous) = previous.filter(|previous| *previous != room) {
            rooms.leave(&previous, self.client_id);
        }

        rooms.join(&room, self.client_id, self.tx.clone());
        for envelope in self.hub.cache().replay(&room) {
            let _ = self.tx.send(envelope);
        }

        tracing::debug!(client_id = self.client_id, room, "joined session room");
        self.room.send_replace(Some(room));
    }

    async fn register(&mut self, key: SessionKey) {
        // A new registration always replaces the previous link
        self.link = None;

        let Some(backend) = self
            .hub
            .fleet()
            .router()
            .assign(&key.identity, Some(&key.secondary))
            .await
        else {
            tracing::warn!(session = %key, "no backend available for session");
            let _ = self.tx.send(Envelope::new(
                UNAVAILABLE_EVENT,
                json!({ "message": NO_BACKEND_MESSAGE }),
            ));
            return;
        };

        tracing::info!(session = %key, backend_id = %backend.id, "binding client to backend");
        self.link = Some(BackendLink::open(
            self.hub.clone(),
            backend,
            key,
            self.room.subscribe(),
        ));
    }

    fn forward(&self, envelope: Envelope) {
        let forwarded = self
            .link
            .as_ref()
            .is_some_and(|link| link.forward(envelope));

        let direction = if forwarded { "to_backend" } else { "dropped" };
        counter!(RELAYED_EVENTS, "direction" => direction).increment(1);
    }

    fn close(&mut self) {
        self.link = None;
        if let Some(room) = self.room.borrow().as_deref() {
            self.hub.rooms().leave(room, self.client_id);
        }
    }
}

fn parse_key(envelope: &Envelope) -> Option<SessionKey> {
    SessionKey::deserialize(&envelope.data).ok()
}
