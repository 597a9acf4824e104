//! In-memory cache substrate.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use repsync_common::{Error, HttpResponse, Result};

use crate::substrate::CacheStorage;

type Namespaces = HashMap<String, HashMap<String, HttpResponse>>;

/// In-memory cache storage.
///
/// Useful for testing and short-lived processes. All entries are lost on drop.
#[derive(Clone, Default)]
pub struct MemoryCacheStorage {
    namespaces: Arc<RwLock<Namespaces>>,
}

impl MemoryCacheStorage {
    /// Create a new empty cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a namespace.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .map(|n| n.get(namespace).map_or(0, HashMap::len))
            .unwrap_or(0)
    }
}

fn poisoned() -> Error {
    Error::Cache("Cache lock poisoned".to_string())
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<HttpResponse>> {
        let namespaces = self.namespaces.read().map_err(|_| poisoned())?;
        Ok(namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, response: &HttpResponse) -> Result<()> {
        let mut namespaces = self.namespaces.write().map_err(|_| poisoned())?;
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read().map_err(|_| poisoned())?;
        let mut names: Vec<String> = namespaces.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().map_err(|_| poisoned())?;
        Ok(namespaces.remove(namespace).is_some())
    }
}
