//! Session routing
//!
//! `assign` decides which backend owns a session. A durable assignment to a
//! healthy backend is always honored. Otherwise the least-loaded healthy
//! backend wins, ties going to the earlier backend in the directory, and the
//! choice is written through to the store.
//!
//! Store failures never block routing: a failed read is treated as "no
//! assignment" and a failed write still returns the decision.

use crate::health::{BackendStatus, HealthAggregator};
use crate::metrics_defs::{ASSIGNMENTS, STORE_ERRORS};
use crate::store::{SessionStore, StoreError};
use crate::types::{Backend, SessionAssignment, SessionKey};
use shared::counter;
use std::sync::Arc;

#[derive(Clone)]
pub struct SessionRouter {
    health: Arc<HealthAggregator>,
    store: Arc<dyn SessionStore>,
}

impl SessionRouter {
    pub fn new(health: Arc<HealthAggregator>, store: Arc<dyn SessionStore>) -> Self {
        SessionRouter { health, store }
    }

    /// Returns the backend that should serve the session, or `None` when no
    /// backend is healthy. Without a secondary key any live backend is
    /// returned and nothing is persisted.
    pub async fn assign(&self, identity: &str, secondary: Option<&str>) -> Option<Backend> {
        let Some(secondary) = secondary else {
            let chosen = least_loaded(&self.health.healthy(), None);
            if chosen.is_none() {
                tracing::warn!(identity, "no healthy backend available");
                counter!(ASSIGNMENTS, "outcome" => "none").increment(1);
            }
            return chosen;
        };

        let key = SessionKey::new(identity, secondary);
        let existing = match self.store.find(&key).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(session = %key, error = %e, "failed to read session assignment");
                counter!(STORE_ERRORS, "op" => "find").increment(1);
                None
            }
        };

        let healthy = self.health.healthy();
        if healthy.is_empty() {
            tracing::warn!(session = %key, "no healthy backend available");
            counter!(ASSIGNMENTS, "outcome" => "none").increment(1);
            return None;
        }

        if let Some(existing) = existing {
            if let Some(status) = healthy.iter().find(|s| s.backend.id == existing.owner) {
                counter!(ASSIGNMENTS, "outcome" => "sticky").increment(1);
                return Some(status.backend.clone());
            }
            tracing::info!(session = %key, previous = %existing.owner, "previous owner is unhealthy, reassigning");
        }

        let chosen = least_loaded(&healthy, None)?;
        let assignment = SessionAssignment {
            key,
            owner: chosen.id.clone(),
        };
        if let Err(e) = self.store.upsert(&assignment).await {
            tracing::error!(session = %assignment.key, error = %e, "failed to persist session assignment");
            counter!(STORE_ERRORS, "op" => "upsert").increment(1);
        }

        tracing::info!(session = %assignment.key, backend_id = %chosen.id, "assigned session");
        counter!(ASSIGNMENTS, "outcome" => "new").increment(1);
        Some(chosen)
    }

    /// Moves a session to the least-loaded healthy backend other than
    /// `excluding`. `Ok(None)` means there was no candidate.
    pub async fn reassign(
        &self,
        key: &SessionKey,
        excluding: &str,
    ) -> Result<Option<Backend>, StoreError> {
        let Some(chosen) = least_loaded(&self.health.healthy(), Some(excluding)) else {
            return Ok(None);
        };

        if let Err(e) = self.store.update_owner(key, &chosen.id).await {
            counter!(STORE_ERRORS, "op" => "update").increment(1);
            return Err(e);
        }

        Ok(Some(chosen))
    }
}

/// `min_by` keeps the first of equal elements, so exact ties resolve to
/// directory order.
fn least_loaded(healthy: &[BackendStatus], excluding: Option<&str>) -> Option<Backend> {
    healthy
        .iter()
        .filter(|status| Some(status.backend.id.as_str()) != excluding)
        .min_by(|a, b| a.load_units.total_cmp(&b.load_units))
        .map(|status| status.backend.clone())
}
