use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::db::Repository;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DismissalKey {
    pub message_id: i64,
    pub url: String,
}

impl DismissalKey {
    pub fn new(message_id: i64, url: impl Into<String>) -> Self {
        Self {
            message_id,
            url: url.into(),
        }
    }
}

/// Links the user chose to see as a plain preview instead of auto-playing.
///
/// Reads are served from memory. When built with a repository, writes go to
/// the database first so the set survives restarts.
#[derive(Default)]
pub struct DismissalLedger {
    dismissed: RwLock<HashSet<DismissalKey>>,
    repository: Option<Arc<Repository>>,
}

impl DismissalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn persistent(repository: Arc<Repository>) -> Result<Self> {
        let keys = repository.get_all_dismissals().await?;
        tracing::debug!("Loaded {} dismissed links", keys.len());
        Ok(Self {
            dismissed: RwLock::new(keys.into_iter().collect()),
            repository: Some(repository),
        })
    }

    pub fn is_dismissed(&self, message_id: i64, url: &str) -> bool {
        self.dismissed
            .read()
            .contains(&DismissalKey::new(message_id, url))
    }

    pub async fn dismiss(&self, message_id: i64, url: &str) -> Result<()> {
        let key = DismissalKey::new(message_id, url);
        if let Some(repository) = &self.repository {
            repository.insert_dismissal(key.clone()).await?;
        }
        self.dismissed.write().insert(key);
        Ok(())
    }

    pub async fn undismiss(&self, message_id: i64, url: &str) -> Result<()> {
        let key = DismissalKey::new(message_id, url);
        if let Some(repository) = &self.repository {
            repository.delete_dismissal(key.clone()).await?;
        }
        self.dismissed.write().remove(&key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.dismissed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dismissed.read().is_empty()
    }
}
