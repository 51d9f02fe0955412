//! Backend directory
//!
//! The registry is built once from configuration and stays immutable for the
//! lifetime of the process. Insertion order is preserved and is the order
//! used to break load ties when routing.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::config::BackendConfig;
use crate::types::{Backend, BackendId};

impl From<BackendConfig> for Backend {
    fn from(config: BackendConfig) -> Self {
        Backend {
            name: config.name.unwrap_or_else(|| config.id.clone()),
            id: config.id,
            url: config.url,
            max_capacity: config.max_capacity,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Registry {
    inner: Arc<IndexMap<BackendId, Backend>>,
}

impl Registry {
    pub fn from_config(backends: Vec<BackendConfig>) -> Self {
        let backends = backends
            .into_iter()
            .map(|config| {
                let backend = Backend::from(config);
                (backend.id.clone(), backend)
            })
            .collect();

        Registry {
            inner: Arc::new(backends),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Backend> {
        self.inner.get(id)
    }

    /// Backends in directory order
    pub fn iter(&self) -> impl Iterator<Item = &Backend> {
        self.inner.values()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn backend_config(id: &str, name: Option<&str>) -> BackendConfig {
        BackendConfig {
            id: id.to_string(),
            url: Url::parse(&format!("http://{id}.internal:3000")).unwrap(),
            name: name.map(String::from),
            max_capacity: 10,
        }
    }

    #[test]
    fn test_registry_order_and_names() {
        let registry = Registry::from_config(vec![
            backend_config("zeta", Some("Zeta")),
            backend_config("alpha", None),
            backend_config("mid", None),
        ]);

        let ids: Vec<_> = registry.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.get("zeta").unwrap().name, "Zeta");
        // Name falls back to the id
        assert_eq!(registry.get("alpha").unwrap().name, "alpha");
        assert!(registry.get("unknown").is_none());
    }
}
