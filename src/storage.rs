use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Local state: remembered preferences and the thumbnail cache index.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub id: i64,
    pub url: String,
    pub media_type: String,
    pub file_path: String,
    pub width: i64,
    pub height: i64,
    pub size_bytes: i64,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub checksum: String,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
    pub in_memory: bool,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let conn = if opts.in_memory {
            Connection::open_in_memory().context("storage: open in-memory database")?
        } else {
            let path = match opts.path {
                Some(path) => path,
                None => default_path().context("storage: resolve default path")?,
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("storage: create directory {}", parent.display()))?;
            }
            let conn = Connection::open(&path)
                .with_context(|| format!("storage: open database at {}", path.display()))?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("storage: set WAL")?;
            conn
        };
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("storage: read preference {key}"))
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            bail!("storage: preference key required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO preferences (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
            params![key, value, Utc::now().timestamp()],
        )
        .with_context(|| format!("storage: write preference {key}"))?;
        Ok(())
    }

    pub fn upsert_media_entry(&self, mut entry: MediaEntry) -> Result<i64> {
        if entry.url.is_empty() {
            bail!("storage: media url required");
        }
        if entry.fetched_at.timestamp() == 0 {
            entry.fetched_at = Utc::now();
        }
        let expires = entry.expires_at.map(|dt| dt.timestamp());
        let conn = self.conn.lock();
        let id: i64 = conn.query_row(
            r#"
INSERT INTO media_cache (url, media_type, file_path, width, height, size_bytes, fetched_at, expires_at, checksum)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(url) DO UPDATE SET
  media_type = excluded.media_type,
  file_path = excluded.file_path,
  width = excluded.width,
  height = excluded.height,
  size_bytes = excluded.size_bytes,
  fetched_at = excluded.fetched_at,
  expires_at = excluded.expires_at,
  checksum = excluded.checksum
RETURNING id
"#,
            params![
                entry.url,
                entry.media_type,
                entry.file_path,
                entry.width,
                entry.height,
                entry.size_bytes,
                entry.fetched_at.timestamp(),
                expires,
                entry.checksum,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_media_entry_by_url(&self, url: &str) -> Result<Option<MediaEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {MEDIA_COLUMNS} FROM media_cache WHERE url = ?1"),
            params![url],
            media_entry_from_row,
        )
        .optional()
        .context("storage: query media entry")
    }

    pub fn total_media_size(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM media_cache",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn list_expired_media(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<MediaEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media_cache \
             WHERE expires_at IS NOT NULL AND expires_at <= ?1 \
             ORDER BY expires_at ASC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![cutoff.timestamp(), limit as i64], media_entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_oldest_media(&self, limit: usize) -> Result<Vec<MediaEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media_cache ORDER BY fetched_at ASC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], media_entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_media_entries(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "DELETE FROM media_cache WHERE id IN ({placeholders})"
        ))?;
        stmt.execute(rusqlite::params_from_iter(ids.iter()))?;
        Ok(())
    }
}

const MEDIA_COLUMNS: &str =
    "id, url, media_type, file_path, width, height, size_bytes, fetched_at, expires_at, checksum";

fn media_entry_from_row(row: &Row<'_>) -> rusqlite::Result<MediaEntry> {
    let fetched: i64 = row.get(7)?;
    let expires: Option<i64> = row.get(8)?;
    Ok(MediaEntry {
        id: row.get(0)?,
        url: row.get(1)?,
        media_type: row.get(2)?,
        file_path: row.get(3)?,
        width: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        height: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        size_bytes: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        fetched_at: Utc
            .timestamp_opt(fetched, 0)
            .single()
            .unwrap_or_else(Utc::now),
        expires_at: expires.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        checksum: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("storage: apply migration {version}"))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

const MIGRATIONS: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS preferences (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS media_cache (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  url TEXT NOT NULL UNIQUE,
  media_type TEXT NOT NULL,
  file_path TEXT NOT NULL,
  width INTEGER,
  height INTEGER,
  size_bytes INTEGER,
  fetched_at INTEGER NOT NULL,
  expires_at INTEGER,
  checksum TEXT
);

CREATE INDEX IF NOT EXISTS idx_media_cache_fetched_at ON media_cache(fetched_at);
CREATE INDEX IF NOT EXISTS idx_media_cache_expires_at ON media_cache(expires_at);
"#,
];

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("imgflow").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(url: &str, size: i64, fetched: i64) -> MediaEntry {
        MediaEntry {
            id: 0,
            url: url.into(),
            media_type: "image/webp".into(),
            file_path: format!("/tmp/{size}"),
            width: 10,
            height: 10,
            size_bytes: size,
            fetched_at: Utc.timestamp_opt(fetched, 0).single().unwrap(),
            expires_at: Some(Utc.timestamp_opt(fetched + 60, 0).single().unwrap()),
            checksum: String::new(),
        }
    }

    #[test]
    fn open_on_disk_runs_migrations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
            in_memory: false,
        })
        .unwrap();
        assert!(path.exists());
        store.set_preference("post-sorting", "top").unwrap();
        store.close().unwrap();

        let reopened = Store::open(Options {
            path: Some(path),
            in_memory: false,
        })
        .unwrap();
        assert_eq!(
            reopened.get_preference("post-sorting").unwrap().as_deref(),
            Some("top")
        );
    }

    #[test]
    fn preferences_overwrite() {
        let store = Store::open(Options {
            in_memory: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(store.get_preference("comment-sorting").unwrap(), None);
        store.set_preference("comment-sorting", "oldest").unwrap();
        store.set_preference("comment-sorting", "top").unwrap();
        assert_eq!(
            store.get_preference("comment-sorting").unwrap().as_deref(),
            Some("top")
        );
        assert!(store.set_preference("", "x").is_err());
    }

    #[test]
    fn media_index_eviction_queries() {
        let store = Store::open(Options {
            in_memory: true,
            ..Default::default()
        })
        .unwrap();
        store.upsert_media_entry(entry("https://a/1.webp", 100, 1_000)).unwrap();
        store.upsert_media_entry(entry("https://a/2.webp", 50, 2_000)).unwrap();
        assert_eq!(store.total_media_size().unwrap(), 150);

        let cutoff = Utc.timestamp_opt(1_500, 0).single().unwrap();
        let expired = store.list_expired_media(cutoff, 10).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].url, "https://a/1.webp");

        let oldest = store.list_oldest_media(1).unwrap();
        store.delete_media_entries(&[oldest[0].id]).unwrap();
        assert!(store.get_media_entry_by_url("https://a/1.webp").unwrap().is_none());
        assert_eq!(store.total_media_size().unwrap(), 50);
    }
}
