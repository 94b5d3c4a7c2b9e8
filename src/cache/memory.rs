use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CacheEntry, CacheStore};
use crate::error::Result;

/// Process-lifetime cache store.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().get(url).cloned())
    }

    async fn insert(&self, entry: CacheEntry) -> Result<bool> {
        match self.entries.write().entry(entry.url.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(true)
            }
        }
    }
}
