//! Failover
//!
//! The coordinator runs as a single worker fed by the health aggregator's
//! down transitions. For a dead backend it moves every durable assignment
//! to a healthy peer and tells the new owner to load the session. Per-session
//! failures are logged and skipped so one bad row cannot stall the pass.

use crate::backend_client::BackendClient;
use crate::metrics_defs::{FAILOVER_PASSES, FAILOVER_SESSIONS, STORE_ERRORS};
use crate::router::SessionRouter;
use crate::store::SessionStore;
use crate::types::BackendId;
use shared::counter;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outcome of one failover pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailoverReport {
    pub moved: usize,
    pub failed: usize,
    pub unplaced: usize,
}

#[derive(Clone)]
pub struct FailoverCoordinator {
    router: SessionRouter,
    store: Arc<dyn SessionStore>,
    client: BackendClient,
}

impl FailoverCoordinator {
    pub fn new(router: SessionRouter, store: Arc<dyn SessionStore>, client: BackendClient) -> Self {
        FailoverCoordinator {
            router,
            store,
            client,
        }
    }

    /// Processes down transitions until the sending side is dropped.
    pub async fn run(self, mut down_rx: mpsc::UnboundedReceiver<BackendId>) {
        while let Some(backend_id) = down_rx.recv().await {
            self.migrate(&backend_id).await;
        }
        tracing::info!("failover worker stopped");
    }

    pub async fn migrate(&self, dead: &str) -> FailoverReport {
        let mut report = FailoverReport::default();

        let sessions = match self.store.list_by_owner(dead).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!(backend_id = dead, error = %e, "failed to list sessions for failover");
                counter!(STORE_ERRORS, "op" => "list").increment(1);
                return report;
            }
        };

        if sessions.is_empty() {
            tracing::info!(backend_id = dead, "no sessions to migrate");
            return report;
        }

        tracing::warn!(backend_id = dead, sessions = sessions.len(), "migrating sessions");

        for assignment in sessions {
            let key = assignment.key;
            match self.router.reassign(&key, dead).await {
                Ok(Some(backend)) => {
                    tracing::info!(session = %key, from = dead, to = %backend.id, "session migrated");
                    report.moved += 1;

                    let client = self.client.clone();
                    tokio::spawn(async move {
                        if let Err(e) = client.load_session(&backend, &key).await {
                            tracing::warn!(session = %key, backend_id = %backend.id, error = %e, "load-session directive failed");
                        }
                    });
                }
                Ok(None) => {
                    report.unplaced += 1;
                }
                Err(e) => {
                    tracing::error!(session = %key, error = %e, "failed to reassign session");
                    report.failed += 1;
                }
            }
        }

        if report.unplaced > 0 {
            tracing::error!(
                backend_id = dead,
                unplaced = report.unplaced,
                "no healthy backend to take over sessions, assignments left unchanged"
            );
        }

        tracing::info!(backend_id = dead, ?report, "failover pass complete");
        counter!(FAILOVER_PASSES).increment(1);
        counter!(FAILOVER_SESSIONS, "outcome" => "moved").increment(report.moved as u64);
        counter!(FAILOVER_SESSIONS, "outcome" => "failed").increment(report.failed as u64);
        counter!(FAILOVER_SESSIONS, "outcome" => "unplaced").increment(report.unplaced as u64);

        report
    }
}
