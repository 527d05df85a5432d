//! Local SQLite store backing the record cache and the action queue
//!
//! The database is opened lazily. Writers create the file on first use;
//! readers only attach to a database that already exists, so asking for
//! statistics never materializes an empty store.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tokio::sync::Mutex;

/// Handle to the lazily opened local database
pub struct LocalStore {
    db_path: String,
    enable_wal: bool,
    max_connections: u32,
    pool: Mutex<Option<SqlitePool>>,
}

impl LocalStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            db_path: config.db_path.clone(),
            enable_wal: config.enable_wal,
            max_connections: config.max_connections.max(1),
            pool: Mutex::new(None),
        }
    }

    /// Pool for writes, creating and initializing the database if needed
    pub async fn writer(&self) -> SyncResult<SqlitePool> {
        self.open(true).await
    }

    /// Pool for reads; `None` when the database has never been created
    pub async fn reader(&self) -> Option<SqlitePool> {
        match self.open(false).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::debug!(db_path = %self.db_path, error = %e, "Local store not readable");
                None
            }
        }
    }

    /// Whether a connection pool is currently held
    pub async fn is_open(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    async fn open(&self, create: bool) -> SyncResult<SqlitePool> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let journal_mode = if self.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", self.db_path))
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?
            .create_if_missing(create)
            .journal_mode(journal_mode)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;

        initialize_schema(&pool).await?;

        tracing::info!(db_path = %self.db_path, "Opened local store");
        *guard = Some(pool.clone());
        Ok(pool)
    }

    /// Read a value from the metadata table
    pub async fn get_meta(&self, key: &str) -> SyncResult<Option<String>> {
        let Some(pool) = self.reader().await else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&pool)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("value")).transpose()?)
    }

    /// Upsert a value in the metadata table
    pub async fn set_meta(&self, key: &str, value: &str) -> SyncResult<()> {
        let pool = self.writer().await?;
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(format_timestamp(Utc::now()))
        .execute(&pool)
        .await?;
        Ok(())
    }

    /// Close the pool; the next access reopens it
    pub async fn close(&self) {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
    }
}

async fn initialize_schema(pool: &SqlitePool) -> SyncResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS equipment_cache (
            entity_type TEXT NOT NULL,
            id TEXT NOT NULL,
            server_payload TEXT,
            optimistic_payload TEXT,
            cached_at TEXT NOT NULL,
            PRIMARY KEY (entity_type, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_actions (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            kind TEXT NOT NULL,
            target_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            created_at TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pending_actions_created ON pending_actions(created_at, seq)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_actions_seq ON pending_actions(seq)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pending_actions_status ON pending_actions(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn test_config(dir: &TempDir) -> EngineConfig {
        EngineConfig {
            db_path: dir.path().join("fieldsync.db").to_string_lossy().into_owned(),
            settle_window_ms: 20,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_reader_does_not_create_database() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = LocalStore::new(&config);

        assert!(store.reader().await.is_none());
        assert!(!store.is_open().await);
        assert!(!std::path::Path::new(&config.db_path).exists());
    }

    #[tokio::test]
    async fn test_writer_creates_schema() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(&test_config(&dir));

        let pool = store.writer().await.unwrap();
        let tables: Vec<String> = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.try_get("name").unwrap())
            .collect();

        assert!(tables.contains(&"equipment_cache".to_string()));
        assert!(tables.contains(&"pending_actions".to_string()));
        assert!(tables.contains(&"sync_metadata".to_string()));
        assert!(store.reader().await.is_some());
    }

    #[tokio::test]
    async fn test_unopenable_path_is_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            db_path: dir.path().join("missing").join("nested").join("db.sqlite").to_string_lossy().into_owned(),
            ..EngineConfig::default()
        };
        let store = LocalStore::new(&config);

        let err = store.writer().await.unwrap_err();
        assert!(matches!(err, SyncError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_metadata_round_trip_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let store = LocalStore::new(&config);
        assert_eq!(store.get_meta("last_synced_at").await.unwrap(), None);
        store.set_meta("last_synced_at", "2026-10-19T10:00:00.000000Z").await.unwrap();
        store.close().await;

        let reopened = LocalStore::new(&config);
        assert_eq!(
            reopened.get_meta("last_synced_at").await.unwrap().as_deref(),
            Some("2026-10-19T10:00:00.000000Z")
        );
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let a = format_timestamp(parse_timestamp("2026-10-19T10:00:00Z").unwrap());
        let b = format_timestamp(parse_timestamp("2026-10-19T10:00:00.5Z").unwrap());
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}
