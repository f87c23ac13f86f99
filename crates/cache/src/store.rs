use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StoreError;

struct StoredValue {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now <= at)
    }
}

type Namespaces = HashMap<String, HashMap<String, StoredValue>>;

/// In-process key-value store partitioned by namespace.
///
/// Values are held as JSON so callers can store any serde type. Entries may
/// carry a TTL and are dropped lazily once it passes. Clones share storage.
#[derive(Clone, Default)]
pub struct NamespacedStore {
    namespaces: Arc<Mutex<Namespaces>>,
}

impl NamespacedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Namespaces> {
        self.namespaces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let value = {
            let mut namespaces = self.lock();
            let Some(entries) = namespaces.get_mut(namespace) else {
                return Ok(None);
            };
            match entries.get(key) {
                Some(stored) if stored.is_live(Instant::now()) => stored.value.clone(),
                Some(_) => {
                    entries.remove(key);
                    debug!(namespace, key, "expired store entry dropped");
                    return Ok(None);
                }
                None => return Ok(None),
            }
        };

        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                namespace: namespace.to_string(),
                key: key.to_string(),
                source,
            })
    }

    pub fn set<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            namespace: namespace.to_string(),
            key: key.to_string(),
            source,
        })?;
        let stored = StoredValue {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.lock()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), stored);
        Ok(())
    }

    pub fn remove(&self, namespace: &str, key: &str) -> bool {
        self.lock()
            .get_mut(namespace)
            .is_some_and(|entries| entries.remove(key).is_some())
    }

    /// Drop every entry in `namespace`. Returns how many were removed.
    pub fn clear_namespace(&self, namespace: &str) -> usize {
        let removed = self.lock().remove(namespace).map_or(0, |entries| entries.len());
        if removed > 0 {
            debug!(namespace, removed, "store namespace cleared");
        }
        removed
    }

    /// Live keys of `namespace`, sorted.
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .lock()
            .get(namespace)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, stored)| stored.is_live(now))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for NamespacedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let namespaces = self.lock();
        let mut names: Vec<&String> = namespaces.keys().collect();
        names.sort();
        f.debug_struct("NamespacedStore").field("namespaces", &names).finish()
    }
}
