//! Durable session assignments.
//!
//! The store is the only authoritative copy of which backend owns a session.
//! It must keep at most one row per session key; writes are upserts keyed by
//! the session key so concurrent writers end up last-write-wins.

use crate::types::{BackendId, SessionAssignment, SessionKey};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("session store request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("session store responded with {status}: {message}")]
    UnexpectedStatus { status: StatusCode, message: String },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find(&self, key: &SessionKey) -> Result<Option<SessionAssignment>, StoreError>;

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<SessionAssignment>, StoreError>;

    /// Inserts the assignment, replacing the owner if the key already exists.
    async fn upsert(&self, assignment: &SessionAssignment) -> Result<(), StoreError>;

    /// Changes the owner of an existing row. Missing rows are left alone.
    async fn update_owner(&self, key: &SessionKey, owner: &str) -> Result<(), StoreError>;

    /// Removes every session of an identity.
    async fn delete_identity(&self, identity: &str) -> Result<(), StoreError>;
}

/// Process-local store. Rows keep insertion order.
#[derive(Default)]
pub struct MemorySessionStore {
    rows: RwLock<IndexMap<SessionKey, BackendId>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find(&self, key: &SessionKey) -> Result<Option<SessionAssignment>, StoreError> {
        Ok(self.rows.read().get(key).map(|owner| SessionAssignment {
            key: key.clone(),
            owner: owner.clone(),
        }))
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<SessionAssignment>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|(_, o)| o.as_str() == owner)
            .map(|(key, o)| SessionAssignment {
                key: key.clone(),
                owner: o.clone(),
            })
            .collect())
    }

    async fn upsert(&self, assignment: &SessionAssignment) -> Result<(), StoreError> {
        self.rows
            .write()
            .insert(assignment.key.clone(), assignment.owner.clone());
        Ok(())
    }

    async fn update_owner(&self, key: &SessionKey, owner: &str) -> Result<(), StoreError> {
        if let Some(current) = self.rows.write().get_mut(key) {
            *current = owner.to_string();
        }
        Ok(())
    }

    async fn delete_identity(&self, identity: &str) -> Result<(), StoreError> {
        self.rows.write().retain(|key, _| key.identity != identity);
        Ok(())
    }
}
