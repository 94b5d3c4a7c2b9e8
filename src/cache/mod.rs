mod memory;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use memory::MemoryCacheStore;

/// A completed download recorded against the link it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub url: String,
    pub local_path: PathBuf,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// Backing key-value store for [`VideoCache`].
///
/// Implementations only need atomic single-key reads and inserts. Entries are
/// write-once: `insert` must leave an existing entry untouched and report
/// `false`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>>;

    async fn insert(&self, entry: CacheEntry) -> Result<bool>;
}

/// Lookup from source link to local media file.
#[derive(Clone)]
pub struct VideoCache {
    store: Arc<dyn CacheStore>,
}

impl VideoCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::default()))
    }

    /// Local path for `url` if a completed download exists.
    pub async fn lookup(&self, url: &str) -> Result<Option<PathBuf>> {
        let entry = self.store.get(url).await?;
        Ok(entry.filter(|e| e.completed).map(|e| e.local_path))
    }

    pub async fn store(&self, url: &str, path: &Path) -> Result<()> {
        let entry = CacheEntry {
            url: url.to_string(),
            local_path: path.to_path_buf(),
            completed: true,
            created_at: Utc::now(),
        };
        if self.store.insert(entry).await? {
            tracing::info!(url, path = %path.display(), "cached video");
        } else {
            tracing::debug!(url, "cache entry already present, keeping the first write");
        }
        Ok(())
    }
}
