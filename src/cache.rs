//! Key-value cache for fetched transactions and resolved tokens
//!
//! Entries are never invalidated individually; only `clear` drops them.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value);

    fn clear(&self);
}

pub type DynCache = dyn Cache;

/// Typed read; an entry that no longer deserializes counts as absent
pub fn get_as<T: DeserializeOwned>(cache: &DynCache, key: &str) -> Option<T> {
    let value = cache.get(key)?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(err) => {
            log::debug!("Ignoring undecodable cache entry {key}: {err}");
            None
        }
    }
}

pub fn set_as<T: Serialize>(cache: &DynCache, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => cache.set(key, v),
        Err(err) => log::warn!("Not caching {key}: {err}"),
    }
}

/// In-process cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.entries.write().insert(key.to_string(), value);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}
