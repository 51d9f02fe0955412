//! Session store backed by a PostgREST-compatible REST endpoint (e.g. Supabase).
//!
//! The base URL points at the REST root (`https://<project>.supabase.co/rest/v1`).
//! Rows look like `{"authId": .., "phoneNumber": .., "server_id": ..}` and the
//! table has a unique constraint on `(authId, phoneNumber)`.

use crate::store::{SessionStore, StoreError};
use crate::types::{SessionAssignment, SessionKey};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use serde::{Deserialize, Serialize};

const SELECT_COLUMNS: &str = "authId,phoneNumber,server_id";
const CONFLICT_COLUMNS: &str = "authId,phoneNumber";

#[derive(Serialize, Deserialize)]
struct SessionRow {
    #[serde(rename = "authId")]
    auth_id: String,
    #[serde(rename = "phoneNumber")]
    phone_number: String,
    server_id: Option<String>,
}

impl SessionRow {
    fn into_assignment(self) -> Option<SessionAssignment> {
        let owner = self.server_id?;
        Some(SessionAssignment {
            key: SessionKey::new(self.auth_id, self.phone_number),
            owner,
        })
    }
}

#[derive(Serialize)]
struct OwnerPatch<'a> {
    server_id: &'a str,
}

pub struct PostgrestSessionStore {
    client: reqwest::Client,
    table_url: Url,
    api_key: Option<String>,
}

impl PostgrestSessionStore {
    pub fn new(base_url: &Url, table: &str, api_key: Option<String>) -> Result<Self, StoreError> {
        let table_url = Url::parse(&format!(
            "{}/{}",
            base_url.as_str().trim_end_matches('/'),
            table
        ))
        .map_err(|e| StoreError::InvalidUrl(e.to_string()))?;

        Ok(PostgrestSessionStore {
            client: reqwest::Client::new(),
            table_url,
            api_key,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    fn key_filter(key: &SessionKey) -> [(&'static str, String); 2] {
        [
            ("authId", format!("eq.{}", key.identity)),
            ("phoneNumber", format!("eq.{}", key.secondary)),
        ]
    }

    async fn select(&self, filter: &[(&str, String)]) -> Result<Vec<SessionAssignment>, StoreError> {
        let request = self
            .client
            .get(self.table_url.clone())
            .query(&[("select", SELECT_COLUMNS)])
            .query(filter);

        let response = send(self.authorized(request)).await?;
        let rows = response.json::<Vec<SessionRow>>().await?;
        Ok(rows
            .into_iter()
            .filter_map(SessionRow::into_assignment)
            .collect())
    }
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response, StoreError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(StoreError::UnexpectedStatus { status, message })
}

#[async_trait]
impl SessionStore for PostgrestSessionStore {
    async fn find(&self, key: &SessionKey) -> Result<Option<SessionAssignment>, StoreError> {
        let mut filter = Self::key_filter(key).to_vec();
        filter.push(("limit", "1".into()));
        Ok(self.select(&filter).await?.into_iter().next())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<SessionAssignment>, StoreError> {
        self.select(&[("server_id", format!("eq.{owner}"))]).await
    }

    async fn upsert(&self, assignment: &SessionAssignment) -> Result<(), StoreError> {
        let row = SessionRow {
            auth_id: assignment.key.identity.clone(),
            phone_number: assignment.key.secondary.clone(),
            server_id: Some(assignment.owner.clone()),
        };

        let request = self
            .client
            .post(self.table_url.clone())
            .query(&[("on_conflict", CONFLICT_COLUMNS)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);

        send(self.authorized(request)).await.map(|_| ())
    }

    async fn update_owner(&self, key: &SessionKey, owner: &str) -> Result<(), StoreError> {
        let request = self
            .client
            .patch(self.table_url.clone())
            .query(&Self::key_filter(key))
            .header("Prefer", "return=minimal")
            .json(&OwnerPatch { server_id: owner });

        send(self.authorized(request)).await.map(|_| ())
    }

    async fn delete_identity(&self, identity: &str) -> Result<(), StoreError> {
        let request = self
            .client
            .delete(self.table_url.clone())
            .query(&[("authId", format!("eq.{identity}"))]);

        send(self.authorized(request)).await.map(|_| ())
    }
}
