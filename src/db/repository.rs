use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::cache::{CacheEntry, CacheStore};
use crate::error::Result;
use crate::ledger::DismissalKey;

use super::schema::SCHEMA;

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Video cache

    pub async fn get_cache_entry(&self, url: &str) -> Result<Option<CacheEntry>> {
        let url = url.to_string();
        let entry = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT url, local_path, completed, created_at FROM video_cache WHERE url = ?1",
                )?;
                let entry = stmt
                    .query_row(params![url], cache_entry_from_row)
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    /// Returns `false` when the url already had an entry.
    pub async fn insert_cache_entry(&self, entry: CacheEntry) -> Result<bool> {
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO video_cache (url, local_path, completed, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        entry.url,
                        entry.local_path.to_string_lossy().to_string(),
                        entry.completed,
                        entry.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(inserted)
    }

    // Dismissals

    pub async fn insert_dismissal(&self, key: DismissalKey) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO dismissals (message_id, url) VALUES (?1, ?2)",
                    params![key.message_id, key.url],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn delete_dismissal(&self, key: DismissalKey) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM dismissals WHERE message_id = ?1 AND url = ?2",
                    params![key.message_id, key.url],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_all_dismissals(&self) -> Result<Vec<DismissalKey>> {
        let keys = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT message_id, url FROM dismissals")?;
                let keys = stmt
                    .query_map([], |row| {
                        Ok(DismissalKey {
                            message_id: row.get(0)?,
                            url: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }

    // View tracking

    pub async fn mark_item_viewed(&self, message_id: i64, url: &str) -> Result<()> {
        let url = url.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO viewed_items (message_id, url) VALUES (?1, ?2)",
                    params![message_id, url],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn is_item_viewed(&self, message_id: i64, url: &str) -> Result<bool> {
        let url = url.to_string();
        let viewed = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM viewed_items WHERE message_id = ?1 AND url = ?2",
                    params![message_id, url],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(viewed)
    }
}

#[async_trait]
impl CacheStore for Repository {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        self.get_cache_entry(url).await
    }

    async fn insert(&self, entry: CacheEntry) -> Result<bool> {
        self.insert_cache_entry(entry).await
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn cache_entry_from_row(row: &Row) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        url: row.get(0)?,
        local_path: PathBuf::from(row.get::<_, String>(1)?),
        completed: row.get::<_, i64>(2)? != 0,
        created_at: row
            .get::<_, String>(3)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}
