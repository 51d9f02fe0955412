//! Dedicated websocket from one relay client to the backend that owns its
//! session.
//!
//! The link re-dials after every disconnect and announces the session with
//! `register-bot-session` on each connect. Inbound backend events are
//! published to the client's current room, read at the time the event
//! arrives. Outbound events queued while the link was down are discarded.

use crate::hub::RelayHub;
use crate::metrics_defs::{BACKEND_LINKS, RELAYED_EVENTS};
use fleet::types::{Backend, Envelope, SessionKey};
use futures_util::{SinkExt, StreamExt};
use shared::{counter, gauge};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub const REGISTER_EVENT: &str = "register-bot-session";

/// Handle owned by the client connection. Dropping it tears the link down.
pub struct BackendLink {
    tx: mpsc::UnboundedSender<Envelope>,
    connected: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl BackendLink {
    pub fn open(
        hub: Arc<RelayHub>,
        backend: Backend,
        key: SessionKey,
        room: watch::Receiver<Option<String>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(hub, backend, key, room, rx, connected.clone()));

        BackendLink {
            tx,
            connected,
            handle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queues a client event for the backend. Returns false, dropping the
    /// event, when the link is not connected.
    pub fn forward(&self, envelope: Envelope) -> bool {
        self.is_connected() && self.tx.send(envelope).is_ok()
    }
}

impl Drop for BackendLink {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(
    hub: Arc<RelayHub>,
    backend: Backend,
    key: SessionKey,
    room: watch::Receiver<Option<String>>,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    connected: Arc<AtomicBool>,
) {
    let url = backend.ws_endpoint(hub.backend_path());
    let register = Envelope::new(
        REGISTER_EVENT,
        serde_json::to_value(&key).unwrap_or_default(),
    );

    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                let (mut sink, mut stream) = socket.split();

                while outbound.try_recv().is_ok() {}

                if let Err(e) = sink.send(Message::Text(register.to_json())).await {
                    tracing::warn!(session = %key, backend_id = %backend.id, error = %e, "failed to register session");
                } else {
                    tracing::info!(session = %key, backend_id = %backend.id, "backend link connected");
                    let _connected = ConnectedGuard::mark(&connected);

                    loop {
                        tokio::select! {
                            frame = stream.next() => match frame {
                                Some(Ok(Message::Text(text))) => relay_inbound(&hub, &key, &room, &text),
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::debug!(session = %key, error = %e, "backend link read failed");
                                    break;
                                }
                            },
                            envelope = outbound.recv() => match envelope {
                                Some(envelope) => {
                                    if let Err(e) = sink.send(Message::Text(envelope.to_json())).await {
                                        tracing::debug!(session = %key, error = %e, "backend link write failed");
                                        break;
                                    }
                                }
                                // The owning client is gone
                                None => {
                                    let _ = sink.close().await;
                                    return;
                                }
                            },
                        }
                    }

                    tracing::info!(session = %key, backend_id = %backend.id, "backend link disconnected");
                }
            }
            Err(e) => {
                tracing::debug!(session = %key, backend_id = %backend.id, error = %e, "backend link connect failed");
            }
        }

        tokio::time::sleep(hub.reconnect_delay()).await;
    }
}

/// Keeps the connected flag and the link gauge in step with the socket,
/// including when the task is aborted mid-connection.
struct ConnectedGuard<'a>(&'a AtomicBool);

impl<'a> ConnectedGuard<'a> {
    fn mark(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        gauge!(BACKEND_LINKS).increment(1.0);
        ConnectedGuard(flag)
    }
}

impl Drop for ConnectedGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        gauge!(BACKEND_LINKS).decrement(1.0);
    }
}

fn relay_inbound(
    hub: &RelayHub,
    key: &SessionKey,
    room: &watch::Receiver<Option<String>>,
    text: &str,
) {
    let envelope = match Envelope::from_json(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(session = %key, error = %e, "ignoring malformed backend frame");
            return;
        }
    };

    let current_room = room.borrow().clone();
    match current_room {
        Some(room) => {
            counter!(RELAYED_EVENTS, "direction" => "to_client").increment(1);
            hub.publish(&room, envelope);
        }
        None => {
            tracing::debug!(session = %key, event = %envelope.event, "client has not joined a room, dropping backend event");
            counter!(RELAYED_EVENTS, "direction" => "dropped").increment(1);
        }
    }
}
