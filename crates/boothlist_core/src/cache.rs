use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::model::ItemMetadata;

/// Transient failures are suppressed for this long before a fresh attempt.
/// Permanent (not-found) records never expire.
pub const ERROR_SUPPRESSION_SECS: i64 = 24 * 3600;

const CACHE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS item_metadata (
    item_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    scraped_at_unix INTEGER NOT NULL,
    has_error INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_item_metadata_error ON item_metadata(has_error);
"#;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub success_entries: usize,
    pub error_entries: usize,
}

/// Persistent metadata cache keyed by string-encoded item id. Every write
/// is committed before the caller proceeds; a cache that cannot be opened
/// or written aborts the run.
pub struct MetadataCache {
    connection: Connection,
}

impl MetadataCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache directory {}", parent.display()))?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open cache db {}", path.display()))?;
        connection
            .execute_batch(CACHE_SCHEMA_SQL)
            .context("failed to initialize cache schema")?;
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().context("failed to open in-memory cache")?;
        connection
            .execute_batch(CACHE_SCHEMA_SQL)
            .context("failed to initialize cache schema")?;
        Ok(Self { connection })
    }

    /// Raw record access, ignoring suppression windows.
    pub fn get(&self, item_id: u64) -> Result<Option<ItemMetadata>> {
        let payload: Option<String> = self
            .connection
            .query_row(
                "SELECT payload FROM item_metadata WHERE item_id = ?1",
                params![item_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query cache")?;
        match payload {
            Some(raw) => {
                let metadata = serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt cache payload for item {item_id}"))?;
                Ok(Some(metadata))
            }
            None => Ok(None),
        }
    }

    /// Cache-first lookup: returns a record the fetch layer may serve
    /// without a network call. Successes always qualify; error records
    /// qualify while still suppressed (permanently for not-found).
    pub fn lookup(&self, item_id: u64, now: DateTime<Utc>) -> Result<Option<ItemMetadata>> {
        let Some(metadata) = self.get(item_id)? else {
            return Ok(None);
        };
        if metadata.error.is_none() || metadata.has_permanent_error() {
            return Ok(Some(metadata));
        }
        let scraped_at = DateTime::parse_from_rfc3339(&metadata.scraped_at)
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let age_secs = now.signed_duration_since(scraped_at).num_seconds();
        if age_secs < ERROR_SUPPRESSION_SECS {
            Ok(Some(metadata))
        } else {
            Ok(None)
        }
    }

    pub fn put(&self, metadata: &ItemMetadata) -> Result<()> {
        let payload = serde_json::to_string(metadata).context("failed to encode cache payload")?;
        let scraped_at_unix = DateTime::parse_from_rfc3339(&metadata.scraped_at)
            .map(|value| value.timestamp())
            .unwrap_or(0);
        self.connection
            .execute(
                "INSERT OR REPLACE INTO item_metadata (item_id, payload, scraped_at_unix, has_error)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    metadata.item_id.to_string(),
                    payload,
                    scraped_at_unix,
                    metadata.error.is_some() as i64,
                ],
            )
            .with_context(|| format!("failed to write cache record for item {}", metadata.item_id))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let total_entries = self
            .count_query("SELECT COUNT(*) FROM item_metadata")
            .context("failed to count cache entries")?;
        let error_entries = self
            .count_query("SELECT COUNT(*) FROM item_metadata WHERE has_error = 1")
            .context("failed to count cache errors")?;
        Ok(CacheStats {
            total_entries,
            success_entries: total_entries - error_entries,
            error_entries,
        })
    }

    fn count_query(&self, sql: &str) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row(sql, [], |row| row.get(0))
            .with_context(|| format!("failed query: {sql}"))?;
        usize::try_from(count).context("count does not fit into usize")
    }
}
