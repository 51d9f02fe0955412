//! Heartbeat channel
//!
//! One long-lived websocket per backend. The connection being open is the
//! heartbeat signal; the backend may additionally push `status` frames with
//! its current load. The task never exits: after any disconnect or failed
//! attempt it waits a fixed delay and dials again.

use crate::health::{HealthAggregator, HealthUpdate};
use crate::types::{Backend, Envelope};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[derive(Deserialize, Debug, Default)]
struct StatusPayload {
    #[serde(rename = "loadUnits", default)]
    load_units: Option<f64>,
    #[serde(rename = "occupantCount", alias = "userCount", default)]
    occupant_count: Option<u64>,
}

pub async fn run(
    health: Arc<HealthAggregator>,
    backend: Backend,
    heartbeat_path: String,
    reconnect_delay: Duration,
) {
    let url = backend.ws_endpoint(&heartbeat_path);

    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((mut stream, _)) => {
                tracing::debug!(backend_id = %backend.id, "heartbeat connected");
                health.apply(&backend.id, HealthUpdate::HeartbeatConnected);

                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => handle_frame(&health, &backend, &text),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(backend_id = %backend.id, error = %e, "heartbeat read failed");
                            break;
                        }
                    }
                }

                tracing::info!(backend_id = %backend.id, "heartbeat disconnected");
            }
            Err(e) => {
                tracing::debug!(backend_id = %backend.id, error = %e, "heartbeat connect failed");
            }
        }

        health.apply(&backend.id, HealthUpdate::HeartbeatDisconnected);
        tokio::time::sleep(reconnect_delay).await;
    }
}

fn handle_frame(health: &HealthAggregator, backend: &Backend, text: &str) {
    let envelope = match Envelope::from_json(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(backend_id = %backend.id, error = %e, "ignoring malformed heartbeat frame");
            return;
        }
    };

    if envelope.event != "status" {
        return;
    }

    let status: StatusPayload = serde_json::from_value(envelope.data).unwrap_or_default();
    health.apply(
        &backend.id,
        HealthUpdate::Status {
            load_units: status.load_units,
            occupant_count: status.occupant_count,
        },
    );
}
