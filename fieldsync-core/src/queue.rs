//! Persistent FIFO queue of mutations not yet confirmed by the server
//!
//! Ordering comes from the persisted `(created_at, seq)` pair, never from the
//! order of in-memory calls, so `list()` survives restarts. `created_at` is
//! clamped to be monotonic per queue and `seq` breaks ties.
//!
//! Every mutation takes `write_lock` for the length of its transaction; a new
//! queue operation cannot start before the previous one has settled.

use crate::cache::{payload_id, EntityType};
use crate::error::{SyncError, SyncResult};
use crate::store::{format_timestamp, parse_timestamp, LocalStore};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What a queued action does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    EquipmentUpdate,
    MaintenanceLogAdd,
    EquipmentCreate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::EquipmentUpdate => "equipment-update",
            ActionKind::MaintenanceLogAdd => "maintenance-log-add",
            ActionKind::EquipmentCreate => "equipment-create",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "equipment-update" => Ok(ActionKind::EquipmentUpdate),
            "maintenance-log-add" => Ok(ActionKind::MaintenanceLogAdd),
            "equipment-create" => Ok(ActionKind::EquipmentCreate),
            _ => Err(SyncError::InvalidOperation(format!("Unknown action kind: {}", s))),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP verb used to replay an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(SyncError::InvalidOperation(format!("Unknown HTTP method: {}", s))),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether automatic drains still pick an action up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    Pending,
    /// Permanently rejected or out of retries; kept for manual handling
    FailedFatal,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::FailedFatal => "failed-fatal",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "failed-fatal" => Ok(ActionStatus::FailedFatal),
            _ => Err(SyncError::InvalidOperation(format!("Unknown action status: {}", s))),
        }
    }
}

/// Caller-supplied part of a queued action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDraft {
    pub kind: ActionKind,
    pub target_id: String,
    pub payload: serde_json::Value,
    pub method: HttpMethod,
    pub url: String,
}

impl ActionDraft {
    /// `PUT /equipment/{id}` with the full equipment representation
    pub fn equipment_update(id: &str, payload: serde_json::Value) -> Self {
        Self {
            kind: ActionKind::EquipmentUpdate,
            target_id: id.to_string(),
            payload,
            method: HttpMethod::Put,
            url: format!("/equipment/{}", id),
        }
    }

    /// `POST /equipment/{equipment_id}/maintenance`
    pub fn maintenance_log_add(equipment_id: &str, record: serde_json::Value) -> Self {
        Self {
            kind: ActionKind::MaintenanceLogAdd,
            target_id: equipment_id.to_string(),
            payload: record,
            method: HttpMethod::Post,
            url: format!("/equipment/{}/maintenance", equipment_id),
        }
    }

    /// `POST /equipment`
    pub fn equipment_create(id: &str, record: serde_json::Value) -> Self {
        Self {
            kind: ActionKind::EquipmentCreate,
            target_id: id.to_string(),
            payload: record,
            method: HttpMethod::Post,
            url: "/equipment".to_string(),
        }
    }
}

/// A mutation waiting for server confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: Uuid,
    pub kind: ActionKind,
    pub target_id: String,
    pub payload: serde_json::Value,
    pub method: HttpMethod,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: ActionStatus,
}

impl PendingAction {
    pub fn is_failed_fatal(&self) -> bool {
        self.status == ActionStatus::FailedFatal
    }

    /// Cache entry this action writes optimistically, if any
    pub fn cache_key(&self) -> Option<(EntityType, String)> {
        match self.kind {
            ActionKind::EquipmentUpdate | ActionKind::EquipmentCreate => {
                Some((EntityType::Equipment, self.target_id.clone()))
            }
            ActionKind::MaintenanceLogAdd => payload_id(&self.payload).map(|id| (EntityType::MaintenanceLog, id)),
        }
    }
}

/// Queue totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub failed_fatal: u64,
}

impl QueueCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.failed_fatal
    }
}

/// Durable ordered log of pending actions
pub struct ActionQueue {
    store: Arc<LocalStore>,
    max_retries: u32,
    write_lock: Mutex<()>,
    in_flight: Mutex<Option<Uuid>>,
}

impl ActionQueue {
    pub fn new(store: Arc<LocalStore>, max_retries: u32) -> Self {
        Self {
            store,
            max_retries,
            write_lock: Mutex::new(()),
            in_flight: Mutex::new(None),
        }
    }

    /// Persist a new action; `false` only when storage fails
    pub async fn enqueue(&self, draft: ActionDraft) -> bool {
        match self.push(draft).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to queue offline action");
                false
            }
        }
    }

    pub(crate) async fn push(&self, draft: ActionDraft) -> SyncResult<PendingAction> {
        let _guard = self.write_lock.lock().await;
        let pool = self.store.writer().await?;
        let mut tx = pool.begin().await?;

        let tail = sqlx::query("SELECT seq, created_at FROM pending_actions ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
        let (seq, created_at) = match tail {
            Some(row) => {
                let last_seq: i64 = row.try_get("seq")?;
                let last_created: String = row.try_get("created_at")?;
                let now = Utc::now().trunc_subsecs(6);
                (last_seq + 1, now.max(parse_timestamp(&last_created)?))
            }
            None => (1, Utc::now().trunc_subsecs(6)),
        };

        let action = PendingAction {
            id: Uuid::new_v4(),
            kind: draft.kind,
            target_id: draft.target_id,
            payload: draft.payload,
            method: draft.method,
            url: draft.url,
            created_at,
            attempts: 0,
            last_error: None,
            status: ActionStatus::Pending,
        };

        sqlx::query(
            r#"
            INSERT INTO pending_actions (
                id, seq, kind, target_id, payload, method, url,
                created_at, attempts, last_error, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)
            "#,
        )
        .bind(action.id.to_string())
        .bind(seq)
        .bind(action.kind.as_str())
        .bind(&action.target_id)
        .bind(action.payload.to_string())
        .bind(action.method.as_str())
        .bind(&action.url)
        .bind(format_timestamp(action.created_at))
        .bind(action.status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            action_id = %action.id,
            kind = %action.kind,
            target_id = %action.target_id,
            seq,
            "Queued offline action"
        );

        Ok(action)
    }

    /// Oldest action still eligible for automatic sync
    pub async fn peek_oldest(&self) -> SyncResult<Option<PendingAction>> {
        let Some(pool) = self.store.reader().await else {
            return Ok(None);
        };

        let row = sqlx::query(
            r#"
            SELECT id, kind, target_id, payload, method, url,
                   created_at, attempts, last_error, status
            FROM pending_actions
            WHERE status = 'pending'
            ORDER BY created_at ASC, seq ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&pool)
        .await?;

        row.as_ref().map(action_from_row).transpose()
    }

    /// Remove an action the server has acknowledged
    pub async fn mark_applied(&self, id: Uuid) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;
        let pool = self.store.writer().await?;

        sqlx::query("DELETE FROM pending_actions WHERE id = ?")
            .bind(id.to_string())
            .execute(&pool)
            .await?;

        tracing::debug!(action_id = %id, "Marked action as applied");
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Non-retryable failures, and retryable ones past the retry ceiling, tag
    /// the action failed-fatal. Returns the resulting status.
    pub async fn mark_failed(&self, id: Uuid, error: &str, retryable: bool) -> SyncResult<ActionStatus> {
        let _guard = self.write_lock.lock().await;
        let pool = self.store.writer().await?;
        let mut tx = pool.begin().await?;

        let row = sqlx::query("SELECT attempts FROM pending_actions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("pending action {}", id)))?;

        let attempts = u32::try_from(row.try_get::<i64, _>("attempts")?)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let status = if !retryable || attempts > self.max_retries {
            ActionStatus::FailedFatal
        } else {
            ActionStatus::Pending
        };

        sqlx::query(
            r#"
            UPDATE pending_actions
            SET attempts = ?,
                last_error = ?,
                status = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(attempts))
        .bind(error)
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if retryable && status == ActionStatus::FailedFatal {
            tracing::warn!(
                action_id = %id,
                error = %SyncError::MaxRetriesExceeded { attempts },
                last_error = error,
                "Action promoted to failed-fatal"
            );
        } else {
            tracing::warn!(
                action_id = %id,
                attempts,
                retryable,
                error = error,
                "Action sync failed"
            );
        }

        Ok(status)
    }

    /// All actions in persisted order, failed-fatal ones included
    pub async fn list(&self) -> Vec<PendingAction> {
        match self.load_all().await {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list pending actions");
                Vec::new()
            }
        }
    }

    /// Pending and failed-fatal totals; `None` when the store was never opened
    pub async fn counts(&self) -> Option<QueueCounts> {
        let pool = self.store.reader().await?;
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'failed-fatal' THEN 1 ELSE 0 END), 0) AS failed_fatal
            FROM pending_actions
            "#,
        )
        .fetch_one(&pool)
        .await;

        match row {
            Ok(row) => {
                let pending: i64 = row.try_get("pending").ok()?;
                let failed_fatal: i64 = row.try_get("failed_fatal").ok()?;
                Some(QueueCounts {
                    pending: u64::try_from(pending).unwrap_or(0),
                    failed_fatal: u64::try_from(failed_fatal).unwrap_or(0),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count pending actions");
                None
            }
        }
    }

    /// Drop a queued action. The action currently being sent cannot be discarded.
    pub async fn discard(&self, id: Uuid) -> bool {
        let _guard = self.write_lock.lock().await;
        if *self.in_flight.lock().await == Some(id) {
            tracing::warn!(action_id = %id, "Refusing to discard in-flight action");
            return false;
        }

        let result = async {
            let pool = self.store.writer().await?;
            let done = sqlx::query("DELETE FROM pending_actions WHERE id = ?")
                .bind(id.to_string())
                .execute(&pool)
                .await?;
            Ok::<_, SyncError>(done.rows_affected() > 0)
        }
        .await;

        match result {
            Ok(removed) => {
                if removed {
                    tracing::info!(action_id = %id, "Discarded pending action");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(action_id = %id, error = %e, "Failed to discard action");
                false
            }
        }
    }

    /// Put a failed-fatal action back into automatic sync. Attempts are kept.
    pub async fn retry(&self, id: Uuid) -> bool {
        let _guard = self.write_lock.lock().await;
        let result = async {
            let pool = self.store.writer().await?;
            let done = sqlx::query("UPDATE pending_actions SET status = 'pending' WHERE id = ? AND status = 'failed-fatal'")
                .bind(id.to_string())
                .execute(&pool)
                .await?;
            Ok::<_, SyncError>(done.rows_affected() > 0)
        }
        .await;

        match result {
            Ok(requeued) => {
                if requeued {
                    tracing::info!(action_id = %id, "Action re-queued for sync");
                }
                requeued
            }
            Err(e) => {
                tracing::warn!(action_id = %id, error = %e, "Failed to re-queue action");
                false
            }
        }
    }

    /// Take the FIFO head for sending; it cannot be discarded until released
    pub(crate) async fn claim_oldest(&self) -> SyncResult<Option<PendingAction>> {
        let _guard = self.write_lock.lock().await;
        let head = self.peek_oldest().await?;
        *self.in_flight.lock().await = head.as_ref().map(|a| a.id);
        Ok(head)
    }

    pub(crate) async fn release(&self) {
        *self.in_flight.lock().await = None;
    }

    async fn load_all(&self) -> SyncResult<Vec<PendingAction>> {
        let Some(pool) = self.store.reader().await else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT id, kind, target_id, payload, method, url,
                   created_at, attempts, last_error, status
            FROM pending_actions
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .fetch_all(&pool)
        .await?;

        rows.iter().map(action_from_row).collect()
    }
}

fn action_from_row(row: &SqliteRow) -> SyncResult<PendingAction> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let payload: String = row.try_get("payload")?;
    let method: String = row.try_get("method")?;
    let created_at: String = row.try_get("created_at")?;
    let attempts: i64 = row.try_get("attempts")?;
    let status: String = row.try_get("status")?;

    Ok(PendingAction {
        id: Uuid::parse_str(&id).map_err(|e| SyncError::Internal(format!("Invalid UUID: {}", e)))?,
        kind: ActionKind::from_str(&kind)?,
        target_id: row.try_get("target_id")?,
        payload: serde_json::from_str(&payload)?,
        method: HttpMethod::from_str(&method)?,
        url: row.try_get("url")?,
        created_at: parse_timestamp(&created_at)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.try_get("last_error")?,
        status: ActionStatus::from_str(&status)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_config;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_queue(dir: &TempDir, max_retries: u32) -> ActionQueue {
        ActionQueue::new(Arc::new(LocalStore::new(&test_config(dir))), max_retries)
    }

    fn status_draft(id: &str, status: &str) -> ActionDraft {
        ActionDraft::equipment_update(id, json!({"id": id, "status": status}))
    }

    #[tokio::test]
    async fn test_enqueue_preserves_fifo_order() {
        let dir = TempDir::new().unwrap();
        let queue = create_test_queue(&dir, 3);

        for i in 0..25 {
            assert!(queue.enqueue(status_draft(&i.to_string(), "maintenance")).await);
        }

        let listed: Vec<String> = queue.list().await.into_iter().map(|a| a.target_id).collect();
        let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
        assert_eq!(listed, expected);

        let head = queue.peek_oldest().await.unwrap().unwrap();
        assert_eq!(head.target_id, "0");
        assert_eq!(head.attempts, 0);
        assert_eq!(head.method, HttpMethod::Put);
        assert_eq!(head.url, "/equipment/0");
    }

    #[tokio::test]
    async fn test_order_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        {
            let queue = ActionQueue::new(Arc::new(LocalStore::new(&config)), 3);
            queue.enqueue(status_draft("a", "x")).await;
            queue.enqueue(status_draft("b", "y")).await;
        }

        let queue = ActionQueue::new(Arc::new(LocalStore::new(&config)), 3);
        let listed: Vec<String> = queue.list().await.into_iter().map(|a| a.target_id).collect();
        assert_eq!(listed, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_concurrent_enqueues_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(create_test_queue(&dir, 3));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.enqueue(status_draft(&i.to_string(), "x")).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let actions = queue.list().await;
        assert_eq!(actions.len(), 10);
        let mut ids: Vec<Uuid> = actions.iter().map(|a| a.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert!(actions.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_mark_applied_removes_action() {
        let dir = TempDir::new().unwrap();
        let queue = create_test_queue(&dir, 3);

        queue.enqueue(status_draft("1", "x")).await;
        queue.enqueue(status_draft("2", "y")).await;
        let head = queue.peek_oldest().await.unwrap().unwrap();

        queue.mark_applied(head.id).await.unwrap();

        let remaining = queue.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].target_id, "2");
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_fatal_and_skipped() {
        let dir = TempDir::new().unwrap();
        let queue = create_test_queue(&dir, 3);

        queue.enqueue(status_draft("1", "x")).await;
        queue.enqueue(status_draft("2", "y")).await;
        let head = queue.peek_oldest().await.unwrap().unwrap();

        let status = queue.mark_failed(head.id, "422 Unprocessable Entity", false).await.unwrap();
        assert_eq!(status, ActionStatus::FailedFatal);

        // Skipped by automatic drains but still visible
        assert_eq!(queue.peek_oldest().await.unwrap().unwrap().target_id, "2");
        let listed = queue.list().await;
        assert_eq!(listed.len(), 2);
        assert!(listed[0].is_failed_fatal());
        assert_eq!(listed[0].attempts, 1);
        assert_eq!(listed[0].last_error.as_deref(), Some("422 Unprocessable Entity"));

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts, QueueCounts { pending: 1, failed_fatal: 1 });
    }

    #[tokio::test]
    async fn test_retry_ceiling_promotes_to_fatal() {
        let dir = TempDir::new().unwrap();
        let queue = create_test_queue(&dir, 2);

        queue.enqueue(status_draft("1", "x")).await;
        let id = queue.peek_oldest().await.unwrap().unwrap().id;

        assert_eq!(queue.mark_failed(id, "503", true).await.unwrap(), ActionStatus::Pending);
        assert_eq!(queue.mark_failed(id, "503", true).await.unwrap(), ActionStatus::Pending);
        assert_eq!(queue.mark_failed(id, "503", true).await.unwrap(), ActionStatus::FailedFatal);

        let action = &queue.list().await[0];
        assert_eq!(action.attempts, 3);
        assert!(queue.peek_oldest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_requeues_failed_action_keeping_attempts() {
        let dir = TempDir::new().unwrap();
        let queue = create_test_queue(&dir, 3);

        queue.enqueue(status_draft("1", "x")).await;
        let id = queue.peek_oldest().await.unwrap().unwrap().id;
        queue.mark_failed(id, "400", false).await.unwrap();

        assert!(queue.retry(id).await);
        assert!(!queue.retry(id).await);

        let head = queue.peek_oldest().await.unwrap().unwrap();
        assert_eq!(head.id, id);
        assert_eq!(head.attempts, 1);
    }

    #[tokio::test]
    async fn test_discard_refuses_in_flight_action() {
        let dir = TempDir::new().unwrap();
        let queue = create_test_queue(&dir, 3);

        queue.enqueue(status_draft("1", "x")).await;
        let id = queue.claim_oldest().await.unwrap().unwrap().id;

        assert!(!queue.discard(id).await);
        queue.release().await;

        assert!(queue.discard(id).await);
        assert!(!queue.discard(id).await);
        assert!(queue.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_mark_failed_unknown_action() {
        let dir = TempDir::new().unwrap();
        let queue = create_test_queue(&dir, 3);
        queue.enqueue(status_draft("1", "x")).await;

        let err = queue.mark_failed(Uuid::new_v4(), "boom", true).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_counts_none_before_store_exists() {
        let dir = TempDir::new().unwrap();
        let queue = create_test_queue(&dir, 3);

        assert!(queue.counts().await.is_none());
        assert!(queue.list().await.is_empty());
        assert!(queue.peek_oldest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_key_follows_action_kind() {
        let dir = TempDir::new().unwrap();
        let queue = create_test_queue(&dir, 3);
        queue.enqueue(status_draft("1", "x")).await;
        queue
            .enqueue(ActionDraft::maintenance_log_add("1", json!({"id": "ml-3", "note": "belt"})))
            .await;
        queue
            .enqueue(ActionDraft::maintenance_log_add("1", json!({"note": "no id yet"})))
            .await;

        let keys: Vec<_> = queue.list().await.iter().map(PendingAction::cache_key).collect();
        assert_eq!(
            keys,
            vec![
                Some((EntityType::Equipment, "1".to_string())),
                Some((EntityType::MaintenanceLog, "ml-3".to_string())),
                None,
            ]
        );
    }

    #[test]
    fn test_draft_serialization_uses_wire_names() {
        let draft = ActionDraft::maintenance_log_add("42", json!({"note": "oil change"}));
        let value = serde_json::to_value(&draft).unwrap();
        assert_eq!(value["kind"], "maintenance-log-add");
        assert_eq!(value["method"], "POST");
        assert_eq!(value["targetId"], "42");
        assert_eq!(value["url"], "/equipment/42/maintenance");
    }
}
