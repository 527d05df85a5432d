//! Local record cache for offline reads
//!
//! Entries are two-phase: the last server-confirmed payload plus an optional
//! optimistic override written before the server has seen the change. Reads
//! collapse the pair to `override ?? confirmed`. A server write clears the
//! override unless a newer local change for the record is still queued.
//!
//! Public operations never return errors. A store that cannot be opened turns
//! writes into `false` and reads into `None`; the cause is logged.

use crate::error::{SyncError, SyncResult};
use crate::store::{format_timestamp, parse_timestamp, LocalStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Kind of record held in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Equipment,
    MaintenanceLog,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Equipment => "equipment",
            EntityType::MaintenanceLog => "maintenanceLog",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "equipment" => Ok(EntityType::Equipment),
            "maintenanceLog" | "maintenance-log" | "maintenance_log" => Ok(EntityType::MaintenanceLog),
            _ => Err(SyncError::InvalidOperation(format!("Unknown entity type: {}", s))),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a cache write comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// Local change not yet confirmed by the server
    Optimistic,
    /// State returned or confirmed by the server
    Server,
}

/// A cached record with its confirmed and optimistic halves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub entity_type: EntityType,
    pub id: String,
    pub server_confirmed: Option<serde_json::Value>,
    pub optimistic_override: Option<serde_json::Value>,
    pub cached_at: DateTime<Utc>,
}

impl CachedEntity {
    /// The payload callers see
    pub fn current(&self) -> Option<&serde_json::Value> {
        self.optimistic_override.as_ref().or(self.server_confirmed.as_ref())
    }

    /// Whether a local change is still waiting for confirmation
    pub fn is_optimistic(&self) -> bool {
        self.optimistic_override.is_some()
    }
}

/// Extract a record id from a payload's `id` field (string or number)
pub fn payload_id(payload: &serde_json::Value) -> Option<String> {
    match payload.get("id")? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Shallow merge of `patch` onto `base`; non-object bases are replaced
pub fn merge_payload(base: Option<&serde_json::Value>, patch: &serde_json::Value) -> serde_json::Value {
    match (base, patch) {
        (Some(serde_json::Value::Object(base)), serde_json::Value::Object(patch)) => {
            let mut merged = base.clone();
            for (key, value) in patch {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// Persistent per-entity-type record cache
#[derive(Clone)]
pub struct RecordCache {
    store: Arc<LocalStore>,
}

impl RecordCache {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Current payload for a record
    pub async fn get(&self, entity_type: EntityType, id: &str) -> Option<serde_json::Value> {
        self.entry(entity_type, id).await.and_then(|e| e.current().cloned())
    }

    /// Full two-phase entry for a record
    pub async fn entry(&self, entity_type: EntityType, id: &str) -> Option<CachedEntity> {
        match self.load(entity_type, id).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(entity_type = %entity_type, id = id, error = %e, "Cache read failed");
                None
            }
        }
    }

    /// Bulk upsert of server state; entities without an `id` are skipped
    pub async fn put_many(&self, entity_type: EntityType, entities: &[serde_json::Value]) -> bool {
        match self.store_many(entity_type, entities).await {
            Ok(written) => {
                tracing::debug!(entity_type = %entity_type, written, "Bulk cache load");
                true
            }
            Err(e) => {
                tracing::warn!(entity_type = %entity_type, error = %e, "Bulk cache load failed");
                false
            }
        }
    }

    /// Write one record, either as an optimistic override or as server state
    pub async fn put_one(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &serde_json::Value,
        origin: WriteOrigin,
    ) -> bool {
        match self.store_one(entity_type, id, payload, origin).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(entity_type = %entity_type, id = id, origin = ?origin, error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Settle a record after a successful sync: `payload` becomes the
    /// confirmed state.
    ///
    /// With `keep_override` a newer local change queued behind the applied one
    /// stays visible until it is settled itself.
    pub async fn confirm(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &serde_json::Value,
        keep_override: bool,
    ) -> bool {
        let result = if keep_override {
            self.store_confirmed(entity_type, id, payload).await
        } else {
            self.store_one(entity_type, id, payload, WriteOrigin::Server).await
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(entity_type = %entity_type, id = id, error = %e, "Cache confirm failed");
                false
            }
        }
    }

    /// Drop a pending optimistic override. Records that only ever existed
    /// locally are removed.
    pub async fn revert(&self, entity_type: EntityType, id: &str) -> bool {
        match self.drop_override(entity_type, id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(entity_type = %entity_type, id = id, error = %e, "Cache revert failed");
                false
            }
        }
    }

    /// Record counts per entity type; `None` when the store was never opened
    pub async fn stats(&self) -> Option<BTreeMap<EntityType, u64>> {
        let pool = self.store.reader().await?;
        let rows = match sqlx::query("SELECT entity_type, COUNT(*) AS n FROM equipment_cache GROUP BY entity_type")
            .fetch_all(&pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Cache stats query failed");
                return None;
            }
        };

        let mut counts: BTreeMap<EntityType, u64> = [(EntityType::Equipment, 0), (EntityType::MaintenanceLog, 0)]
            .into_iter()
            .collect();
        for row in rows {
            let raw: String = row.try_get("entity_type").ok()?;
            let n: i64 = row.try_get("n").ok()?;
            if let Ok(entity_type) = EntityType::from_str(&raw) {
                counts.insert(entity_type, u64::try_from(n).unwrap_or(0));
            }
        }
        Some(counts)
    }

    async fn load(&self, entity_type: EntityType, id: &str) -> SyncResult<Option<CachedEntity>> {
        let Some(pool) = self.store.reader().await else {
            return Ok(None);
        };

        let row = sqlx::query(
            r#"
            SELECT server_payload, optimistic_payload, cached_at
            FROM equipment_cache
            WHERE entity_type = ? AND id = ?
            "#,
        )
        .bind(entity_type.as_str())
        .bind(id)
        .fetch_optional(&pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let server_payload: Option<String> = row.try_get("server_payload")?;
        let optimistic_payload: Option<String> = row.try_get("optimistic_payload")?;
        let cached_at: String = row.try_get("cached_at")?;

        Ok(Some(CachedEntity {
            entity_type,
            id: id.to_string(),
            server_confirmed: server_payload.as_deref().map(serde_json::from_str::<serde_json::Value>).transpose()?,
            optimistic_override: optimistic_payload.as_deref().map(serde_json::from_str::<serde_json::Value>).transpose()?,
            cached_at: parse_timestamp(&cached_at)?,
        }))
    }

    async fn store_many(&self, entity_type: EntityType, entities: &[serde_json::Value]) -> SyncResult<usize> {
        let pool = self.store.writer().await?;
        let now = format_timestamp(Utc::now());
        let mut tx = pool.begin().await?;
        let mut written = 0;

        for entity in entities {
            let Some(id) = payload_id(entity) else {
                tracing::warn!(entity_type = %entity_type, "Skipping cached entity without id");
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO equipment_cache (entity_type, id, server_payload, optimistic_payload, cached_at)
                VALUES (?, ?, ?, NULL, ?)
                ON CONFLICT(entity_type, id) DO UPDATE SET
                    server_payload = excluded.server_payload,
                    optimistic_payload = NULL,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(entity_type.as_str())
            .bind(&id)
            .bind(entity.to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn store_one(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &serde_json::Value,
        origin: WriteOrigin,
    ) -> SyncResult<()> {
        let pool = self.store.writer().await?;
        let sql = match origin {
            WriteOrigin::Optimistic => {
                r#"
                INSERT INTO equipment_cache (entity_type, id, server_payload, optimistic_payload, cached_at)
                VALUES (?, ?, NULL, ?, ?)
                ON CONFLICT(entity_type, id) DO UPDATE SET
                    optimistic_payload = excluded.optimistic_payload,
                    cached_at = excluded.cached_at
                "#
            }
            WriteOrigin::Server => {
                r#"
                INSERT INTO equipment_cache (entity_type, id, server_payload, optimistic_payload, cached_at)
                VALUES (?, ?, ?, NULL, ?)
                ON CONFLICT(entity_type, id) DO UPDATE SET
                    server_payload = excluded.server_payload,
                    optimistic_payload = NULL,
                    cached_at = excluded.cached_at
                "#
            }
        };

        sqlx::query(sql)
            .bind(entity_type.as_str())
            .bind(id)
            .bind(payload.to_string())
            .bind(format_timestamp(Utc::now()))
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn store_confirmed(&self, entity_type: EntityType, id: &str, payload: &serde_json::Value) -> SyncResult<()> {
        let pool = self.store.writer().await?;
        sqlx::query(
            r#"
            INSERT INTO equipment_cache (entity_type, id, server_payload, optimistic_payload, cached_at)
            VALUES (?, ?, ?, NULL, ?)
            ON CONFLICT(entity_type, id) DO UPDATE SET
                server_payload = excluded.server_payload,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(entity_type.as_str())
        .bind(id)
        .bind(payload.to_string())
        .bind(format_timestamp(Utc::now()))
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn drop_override(&self, entity_type: EntityType, id: &str) -> SyncResult<()> {
        let Some(pool) = self.store.reader().await else {
            return Ok(());
        };
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM equipment_cache WHERE entity_type = ? AND id = ? AND server_payload IS NULL")
            .bind(entity_type.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE equipment_cache SET optimistic_payload = NULL WHERE entity_type = ? AND id = ?")
            .bind(entity_type.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
