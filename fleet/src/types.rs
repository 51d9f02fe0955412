use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

pub type BackendId = String;

/// A worker backend from the static directory.
#[derive(Clone, Debug, PartialEq)]
pub struct Backend {
    pub id: BackendId,
    pub url: Url,
    pub name: String,
    pub max_capacity: u32,
}

impl Backend {
    /// Joins a path onto the backend base URL, keeping any base path prefix.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Same as `endpoint` with the scheme switched to its websocket form.
    pub fn ws_endpoint(&self, path: &str) -> String {
        let http = self.endpoint(path);
        if let Some(rest) = http.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = http.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            http
        }
    }
}

/// Identifies one bot session: the owning user and the secondary key (phone number).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    #[serde(rename = "authId", alias = "identity")]
    pub identity: String,
    #[serde(rename = "phoneNumber", alias = "secondaryKey")]
    pub secondary: String,
}

impl SessionKey {
    pub fn new<I, S>(identity: I, secondary: S) -> Self
    where
        I: Into<String>,
        S: Into<String>,
    {
        SessionKey {
            identity: identity.into(),
            secondary: secondary.into(),
        }
    }

    /// Relay room name for this session.
    pub fn room(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identity, self.secondary)
    }
}

/// Event frame used on every websocket channel: `{"event": name, "data": payload}`.
///
/// The payload is carried as opaque JSON so events the gateway does not
/// understand pass through unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Envelope {
            event: event.into(),
            data,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> String {
        // Serializing a String and a Value cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Durable record of which backend owns a session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionAssignment {
    pub key: SessionKey,
    pub owner: BackendId,
}
