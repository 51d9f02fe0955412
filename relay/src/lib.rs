//! Realtime relay
//!
//! Clients connect to a websocket at `/socket` and exchange
//! `{"event", "data"}` envelopes. A client joins a session room to receive
//! that session's events, and registers the session to get a dedicated link
//! to the backend that owns it. The latest QR and pairing code per room are
//! cached and replayed to clients that join later.
//!
//! A second listener serves health, readiness and the fleet admin API.

mod admin_service;
pub mod cache;
pub mod config;
mod connection;
pub mod errors;
mod fanout;
pub mod hub;
mod link;
pub mod metrics_defs;
mod relay_service;
pub mod rooms;

#[cfg(test)]
mod testutils;

use admin_service::AdminService;
use errors::RelayError;
use fleet::Fleet;
use hub::RelayHub;
use relay_service::RelayService;
use shared::http::run_http_service;
use std::sync::Arc;

/// Serves the relay and admin listeners until one of them fails.
pub async fn run(fleet: Fleet, config: config::Config) -> Result<(), RelayError> {
    config.validate()?;

    let hub = Arc::new(RelayHub::new(fleet, &config));

    let relay_task = run_http_service::<_, _, RelayError>(
        &config.listener.host,
        config.listener.port,
        RelayService::new(hub.clone()),
    );
    let admin_task = run_http_service::<_, _, RelayError>(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(hub),
    );

    tokio::try_join!(relay_task, admin_task)?;
    Ok(())
}
