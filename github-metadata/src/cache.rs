//! Disk-backed result cache.
//!
//! A single-file key/value database with per-entry timestamps. Reads
//! outside the TTL miss; writes past the size ceiling evict the oldest
//! entries.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::GithubMetadataError;
use crate::v3::PackageBasicMetadata;

/// Seconds since the Unix epoch.
pub(crate) fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[derive(Debug)]
pub(crate) struct DiskCache {
    conn: Mutex<Connection>,
    path: PathBuf,
    ttl: Duration,
    size_limit_bytes: u64,
}

impl DiskCache {
    pub(crate) fn open(
        path: &Path,
        ttl: Duration,
        size_limit_bytes: u64,
    ) -> Result<Self, GithubMetadataError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_owned(),
            ttl,
            size_limit_bytes,
        })
    }

    /// The cached record for `key`, if present and within the TTL.
    pub(crate) fn get(
        &self,
        key: &str,
    ) -> Result<Option<PackageBasicMetadata>, GithubMetadataError> {
        let conn = self.conn.lock().expect("cache connection poisoned");
        let row = conn
            .query_row(
                "SELECT value, updated_at FROM metadata_cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            Some((value, updated_at)) => {
                let age = now_epoch().saturating_sub(updated_at as u64);
                if age >= self.ttl.as_secs() {
                    return Ok(None);
                }
                let metadata = serde_json::from_str(&value).map_err(|e| {
                    GithubMetadataError::InvalidResponse(format!("corrupt cache entry: {}", e))
                })?;
                Ok(Some(metadata))
            }
            None => Ok(None),
        }
    }

    /// Store `metadata` under `key`, stamped with the current time.
    pub(crate) fn put(
        &self,
        key: &str,
        metadata: &PackageBasicMetadata,
    ) -> Result<(), GithubMetadataError> {
        let value = serde_json::to_string(metadata).expect("metadata serializes");
        let conn = self.conn.lock().expect("cache connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO metadata_cache (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now_epoch() as i64],
        )?;
        self.enforce_size_limit(&conn)?;
        Ok(())
    }

    fn enforce_size_limit(&self, conn: &Connection) -> Result<(), GithubMetadataError> {
        let size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if size <= self.size_limit_bytes {
            return Ok(());
        }

        // Drop the oldest quarter of entries and reclaim the space.
        conn.execute(
            "DELETE FROM metadata_cache WHERE key IN (
                SELECT key FROM metadata_cache ORDER BY updated_at ASC
                LIMIT (SELECT COUNT(*) / 4 + 1 FROM metadata_cache)
            )",
            [],
        )?;
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(summary: &str) -> PackageBasicMetadata {
        PackageBasicMetadata {
            summary: Some(summary.to_string()),
            keywords: None,
            versions: vec![semver::Version::parse("1.0.0").unwrap()],
            authors: None,
            readme_url: None,
            license_url: None,
            languages: None,
            watchers_count: Some(7),
            processed_at_epoch_secs: now_epoch(),
        }
    }

    #[test]
    fn round_trips_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(
            &dir.path().join("cache.db"),
            Duration::from_secs(3600),
            u64::MAX,
        )
        .unwrap();

        assert!(cache.get("mona.LinkedList").unwrap().is_none());

        let stored = metadata("links");
        cache.put("mona.LinkedList", &stored).unwrap();
        assert_eq!(cache.get("mona.LinkedList").unwrap(), Some(stored));
    }

    #[test]
    fn expired_entries_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache =
            DiskCache::open(&dir.path().join("cache.db"), Duration::from_secs(0), u64::MAX)
                .unwrap();

        cache.put("mona.LinkedList", &metadata("links")).unwrap();
        assert!(cache.get("mona.LinkedList").unwrap().is_none());
    }

    #[test]
    fn size_ceiling_evicts_oldest_entries() {
        let dir = tempfile::tempdir().unwrap();
        // A ceiling small enough that any write overflows it.
        let cache =
            DiskCache::open(&dir.path().join("cache.db"), Duration::from_secs(3600), 1).unwrap();

        for i in 0..8 {
            cache.put(&format!("pkg{}", i), &metadata("x")).unwrap();
        }

        // Eviction ran; the database survived and still answers.
        let conn = cache.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM metadata_cache", [], |row| row.get(0))
            .unwrap();
        assert!(count < 8);
    }
}
