//! Sync coordinator
//!
//! Drains the action queue against the remote API, one action at a time in
//! FIFO order:
//!
//! - no response (transport failure): stop, leave the queue untouched
//! - 4xx: tag the action failed-fatal and move on to the next one
//! - other non-2xx: count a retryable failure and stop, so nothing overtakes it
//! - 2xx: write the returned state into the cache and drop the action
//!
//! `SyncState.status` doubles as the re-entrancy guard: a run only starts
//! when it can flip the status to `Syncing`.

use crate::cache::{payload_id, EntityType, RecordCache};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::queue::{ActionKind, ActionQueue, PendingAction};
use crate::remote::{RemoteApi, RemoteResponse};
use crate::store::{format_timestamp, parse_timestamp, LocalStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

const LAST_SYNCED_KEY: &str = "last_synced_at";

/// Coordinator status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

/// Snapshot exposed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub is_online: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Result of one coordinator run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to do: already syncing, offline, or no pending action
    NoOp,
    /// The drain ran to completion
    Synced { applied: usize, rejected: usize },
    /// The remote stopped answering (or asked to retry later); the rest stays queued
    Interrupted { applied: usize },
    /// The local store failed mid-run
    Failed { applied: usize },
}

impl SyncOutcome {
    /// Boolean view: whether a completed run applied at least one action
    pub fn applied_any(&self) -> bool {
        matches!(self, SyncOutcome::Synced { applied, .. } if *applied > 0)
    }
}

enum Step {
    Applied,
    Rejected,
    Interrupted,
    Failed(SyncError),
}

/// Drains the queue and applies results to the cache
pub struct SyncCoordinator {
    store: Arc<LocalStore>,
    cache: RecordCache,
    queue: Arc<ActionQueue>,
    remote: Arc<dyn RemoteApi>,
    connectivity: Arc<ConnectivityMonitor>,
    state: watch::Sender<SyncState>,
    _state_rx: watch::Receiver<SyncState>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<LocalStore>,
        cache: RecordCache,
        queue: Arc<ActionQueue>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        let (state, state_rx) = watch::channel(SyncState {
            status: SyncStatus::Idle,
            is_online: connectivity.is_online(),
            last_synced_at: None,
        });

        Self {
            store,
            cache,
            queue,
            remote,
            connectivity,
            state,
            _state_rx: state_rx,
        }
    }

    /// Load `last_synced_at` persisted by a previous process
    pub async fn restore(&self) {
        let restored = match self.store.get_meta(LAST_SYNCED_KEY).await {
            Ok(Some(raw)) => parse_timestamp(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to restore last sync time");
                None
            }
        };
        if restored.is_some() {
            self.state.send_modify(|s| s.last_synced_at = restored);
        }
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Mirror the monitor's settled state into `SyncState`
    pub fn set_online(&self, online: bool) {
        self.state.send_if_modified(|s| {
            if s.is_online == online {
                false
            } else {
                s.is_online = online;
                true
            }
        });
    }

    /// Drain the queue once
    pub async fn run(&self) -> SyncOutcome {
        self.run_bounded(None).await
    }

    /// Send only the head of the queue
    pub async fn run_next(&self) -> SyncOutcome {
        self.run_bounded(Some(1)).await
    }

    async fn run_bounded(&self, limit: Option<usize>) -> SyncOutcome {
        if self.state.borrow().status == SyncStatus::Syncing {
            tracing::debug!("Sync already running");
            return SyncOutcome::NoOp;
        }

        let online = self.connectivity.is_online();
        self.set_online(online);
        if !online {
            tracing::debug!("Offline, skipping sync");
            return SyncOutcome::NoOp;
        }

        match self.queue.peek_oldest().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.transition_from(SyncStatus::Error, SyncStatus::Idle);
                return SyncOutcome::NoOp;
            }
            Err(e) => {
                tracing::error!(error = %e, "Action queue unreadable");
                self.transition_from(SyncStatus::Idle, SyncStatus::Error);
                return SyncOutcome::Failed { applied: 0 };
            }
        }

        let acquired = self.state.send_if_modified(|s| {
            if s.status == SyncStatus::Syncing {
                false
            } else {
                s.status = SyncStatus::Syncing;
                true
            }
        });
        if !acquired {
            return SyncOutcome::NoOp;
        }

        tracing::info!("Sync started");
        let outcome = self.drain(limit).await;
        self.finish(outcome).await;
        outcome
    }

    async fn drain(&self, limit: Option<usize>) -> SyncOutcome {
        let mut applied = 0;
        let mut rejected = 0;

        loop {
            if matches!(limit, Some(n) if applied + rejected >= n) {
                break;
            }
            if !self.connectivity.is_online() {
                tracing::info!(applied, "Went offline during sync");
                return SyncOutcome::Interrupted { applied };
            }

            let action = match self.queue.claim_oldest().await {
                Ok(Some(action)) => action,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read next action");
                    return SyncOutcome::Failed { applied };
                }
            };

            let response = self.remote.dispatch(&action).await;
            let step = self.settle(&action, response).await;
            self.queue.release().await;

            match step {
                Step::Applied => applied += 1,
                Step::Rejected => rejected += 1,
                Step::Interrupted => return SyncOutcome::Interrupted { applied },
                Step::Failed(e) => {
                    tracing::error!(action_id = %action.id, error = %e, "Local store failed during sync");
                    return SyncOutcome::Failed { applied };
                }
            }
        }

        SyncOutcome::Synced { applied, rejected }
    }

    async fn settle(&self, action: &PendingAction, response: SyncResult<RemoteResponse>) -> Step {
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                // Not counted against attempts
                tracing::warn!(action_id = %action.id, error = %e, "No response from remote, keeping queue");
                return Step::Interrupted;
            }
        };

        if response.is_success() {
            self.apply_to_cache(action, response.body.as_ref()).await;
            return match self.queue.mark_applied(action.id).await {
                Ok(()) => {
                    tracing::debug!(action_id = %action.id, kind = %action.kind, "Action applied");
                    Step::Applied
                }
                Err(e) => Step::Failed(e),
            };
        }

        let message = response.error_message();
        if response.is_rejection() {
            let err = SyncError::ServerRejected {
                status: response.status,
                message: message.clone(),
            };
            tracing::warn!(action_id = %action.id, kind = %action.kind, error = %err, "Action rejected");
            return match self.queue.mark_failed(action.id, &message, false).await {
                Ok(_) => Step::Rejected,
                Err(e) => Step::Failed(e),
            };
        }

        match self.queue.mark_failed(action.id, &message, true).await {
            Ok(_) => Step::Interrupted,
            Err(e) => Step::Failed(e),
        }
    }

    async fn apply_to_cache(&self, action: &PendingAction, body: Option<&serde_json::Value>) {
        let returned = body.filter(|b| b.is_object());
        // No body: the server took the payload as sent
        let confirmed = returned.unwrap_or(&action.payload);
        let local = action.cache_key();

        let (entity_type, record_id) = match action.kind {
            ActionKind::EquipmentUpdate => (EntityType::Equipment, Some(action.target_id.clone())),
            ActionKind::EquipmentCreate => (
                EntityType::Equipment,
                returned.and_then(payload_id).or_else(|| Some(action.target_id.clone())),
            ),
            ActionKind::MaintenanceLogAdd => (
                EntityType::MaintenanceLog,
                returned
                    .and_then(payload_id)
                    .or_else(|| local.as_ref().map(|(_, id)| id.clone())),
            ),
        };
        let Some(record_id) = record_id else {
            return;
        };

        let keep_override = self.has_queued_sibling(action, entity_type, &record_id).await;
        let mut written = self.cache.confirm(entity_type, &record_id, confirmed, keep_override).await;

        // Server assigned its own id; drop the local placeholder
        if let Some((_, local_id)) = local.filter(|(_, id)| *id != record_id) {
            if !self.has_queued_sibling(action, entity_type, &local_id).await {
                written &= self.cache.revert(entity_type, &local_id).await;
            }
        }

        if !written {
            tracing::warn!(action_id = %action.id, "Applied action could not be reflected in the cache");
        }
    }

    /// Whether another queued action still writes the same cache entry
    async fn has_queued_sibling(&self, action: &PendingAction, entity_type: EntityType, id: &str) -> bool {
        self.queue.list().await.iter().any(|other| {
            other.id != action.id && matches!(other.cache_key(), Some((t, ref k)) if t == entity_type && k == id)
        })
    }

    async fn finish(&self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Synced { applied, rejected } => {
                let now = Utc::now();
                if let Err(e) = self.store.set_meta(LAST_SYNCED_KEY, &format_timestamp(now)).await {
                    tracing::warn!(error = %e, "Failed to persist last sync time");
                }
                self.state.send_modify(|s| {
                    s.status = SyncStatus::Idle;
                    s.last_synced_at = Some(now);
                });
                tracing::info!(applied, rejected, "Sync finished");
            }
            SyncOutcome::Interrupted { applied } => {
                self.state.send_modify(|s| s.status = SyncStatus::Idle);
                tracing::info!(applied, "Sync interrupted, remaining actions stay queued");
            }
            SyncOutcome::Failed { applied } => {
                self.state.send_modify(|s| s.status = SyncStatus::Error);
                tracing::error!(applied, "Sync failed");
            }
            SyncOutcome::NoOp => {
                self.state.send_modify(|s| s.status = SyncStatus::Idle);
            }
        }
    }

    fn transition_from(&self, from: SyncStatus, to: SyncStatus) {
        self.state.send_if_modified(|s| {
            if s.status == from {
                s.status = to;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::WriteOrigin;
    use crate::queue::ActionDraft;
    use crate::store::tests::test_config;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{Mutex, Notify};

    /// Remote that answers from a script; 200 with no body once the script runs out
    #[derive(Default)]
    pub(crate) struct ScriptedRemote {
        script: Mutex<VecDeque<SyncResult<RemoteResponse>>>,
        pub(crate) seen: Mutex<Vec<PendingAction>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedRemote {
        pub(crate) fn new(script: Vec<SyncResult<RemoteResponse>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        /// Every dispatch waits for `gate` to be notified
        pub(crate) fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        pub(crate) async fn seen_targets(&self) -> Vec<String> {
            self.seen.lock().await.iter().map(|a| a.target_id.clone()).collect()
        }
    }

    pub(crate) fn ok(body: Option<serde_json::Value>) -> SyncResult<RemoteResponse> {
        Ok(RemoteResponse { status: 200, body })
    }

    pub(crate) fn status(code: u16) -> SyncResult<RemoteResponse> {
        Ok(RemoteResponse { status: code, body: None })
    }

    pub(crate) fn connection_refused() -> SyncResult<RemoteResponse> {
        Err(SyncError::Network("connection refused".to_string()))
    }

    #[async_trait]
    impl RemoteApi for ScriptedRemote {
        async fn dispatch(&self, action: &PendingAction) -> SyncResult<RemoteResponse> {
            self.seen.lock().await.push(action.clone());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.script.lock().await.pop_front().unwrap_or_else(|| ok(None))
        }
    }

    struct Fixture {
        _dir: TempDir,
        cache: RecordCache,
        queue: Arc<ActionQueue>,
        monitor: Arc<ConnectivityMonitor>,
        remote: Arc<ScriptedRemote>,
        coordinator: Arc<SyncCoordinator>,
    }

    fn fixture(remote: ScriptedRemote, online: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = Arc::new(LocalStore::new(&config));
        let cache = RecordCache::new(store.clone());
        let queue = Arc::new(ActionQueue::new(store.clone(), config.max_retries));
        let monitor = Arc::new(ConnectivityMonitor::new(Some(online), config.settle_window()));
        let remote = Arc::new(remote);
        let coordinator = Arc::new(SyncCoordinator::new(
            store,
            cache.clone(),
            queue.clone(),
            remote.clone(),
            monitor.clone(),
        ));
        Fixture {
            _dir: dir,
            cache,
            queue,
            monitor,
            remote,
            coordinator,
        }
    }

    fn update(id: &str, status: &str) -> ActionDraft {
        ActionDraft::equipment_update(id, json!({"id": id, "status": status}))
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop_and_idle() {
        let f = fixture(ScriptedRemote::default(), true);

        assert_eq!(f.coordinator.run().await, SyncOutcome::NoOp);
        assert!(!f.coordinator.run().await.applied_any());
        let state = f.coordinator.state();
        assert_eq!(state.status, SyncStatus::Idle);
        assert_eq!(state.last_synced_at, None);
    }

    #[tokio::test]
    async fn test_offline_run_is_noop() {
        let f = fixture(ScriptedRemote::default(), false);
        f.queue.enqueue(update("1", "maintenance")).await;

        assert_eq!(f.coordinator.run().await, SyncOutcome::NoOp);
        assert!(f.remote.seen.lock().await.is_empty());
        assert_eq!(f.queue.list().await.len(), 1);
        assert!(!f.coordinator.state().is_online);
    }

    #[tokio::test]
    async fn test_drains_in_fifo_order_and_applies_server_state() {
        let f = fixture(
            ScriptedRemote::new(vec![
                ok(Some(json!({"id": "1", "status": "maintenance", "updatedAt": "2026-10-19"}))),
                ok(None),
            ]),
            true,
        );
        f.cache
            .put_one(EntityType::Equipment, "2", &json!({"id": "2", "status": "lost"}), WriteOrigin::Optimistic)
            .await;
        f.queue.enqueue(update("1", "maintenance")).await;
        f.queue.enqueue(update("2", "lost")).await;

        let outcome = f.coordinator.run().await;

        assert_eq!(outcome, SyncOutcome::Synced { applied: 2, rejected: 0 });
        assert!(outcome.applied_any());
        assert_eq!(f.remote.seen_targets().await, vec!["1", "2"]);
        assert!(f.queue.list().await.is_empty());

        let one = f.cache.entry(EntityType::Equipment, "1").await.unwrap();
        assert_eq!(one.server_confirmed.unwrap()["updatedAt"], "2026-10-19");
        let two = f.cache.entry(EntityType::Equipment, "2").await.unwrap();
        assert!(!two.is_optimistic());
        assert_eq!(two.server_confirmed, Some(json!({"id": "2", "status": "lost"})));

        let state = f.coordinator.state();
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_bodyless_success_confirms_sent_payload_not_later_override() {
        let f = fixture(ScriptedRemote::new(vec![ok(None), status(422)]), true);
        f.cache
            .put_many(EntityType::Equipment, &[json!({"id": "1", "status": "available"})])
            .await;
        for status in ["lost", "retired"] {
            let payload = json!({"id": "1", "status": status});
            f.cache
                .put_one(EntityType::Equipment, "1", &payload, WriteOrigin::Optimistic)
                .await;
            f.queue.enqueue(ActionDraft::equipment_update("1", payload)).await;
        }

        assert_eq!(f.coordinator.run().await, SyncOutcome::Synced { applied: 1, rejected: 1 });

        let entry = f.cache.entry(EntityType::Equipment, "1").await.unwrap();
        assert_eq!(entry.server_confirmed, Some(json!({"id": "1", "status": "lost"})));
        assert_eq!(entry.optimistic_override, Some(json!({"id": "1", "status": "retired"})));

        // Dropping the rejected change falls back to what the server accepted
        f.cache.revert(EntityType::Equipment, "1").await;
        assert_eq!(f.cache.get(EntityType::Equipment, "1").await.unwrap()["status"], "lost");
    }

    #[tokio::test]
    async fn test_run_next_sends_only_the_head() {
        let f = fixture(ScriptedRemote::default(), true);
        f.queue.enqueue(update("1", "x")).await;
        f.queue.enqueue(update("2", "y")).await;

        assert_eq!(f.coordinator.run_next().await, SyncOutcome::Synced { applied: 1, rejected: 0 });
        assert_eq!(f.remote.seen_targets().await, vec!["1"]);
        assert_eq!(f.queue.list().await[0].target_id, "2");
        assert_eq!(f.coordinator.state().status, SyncStatus::Idle);

        assert_eq!(f.coordinator.run().await, SyncOutcome::Synced { applied: 1, rejected: 0 });
        assert!(f.queue.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_queue_untouched() {
        let f = fixture(ScriptedRemote::new(vec![connection_refused()]), true);
        f.queue.enqueue(update("1", "maintenance")).await;
        f.queue.enqueue(update("2", "available")).await;

        let outcome = f.coordinator.run().await;

        assert_eq!(outcome, SyncOutcome::Interrupted { applied: 0 });
        assert!(!outcome.applied_any());
        assert_eq!(f.coordinator.state().status, SyncStatus::Idle);
        assert_eq!(f.remote.seen_targets().await, vec!["1"]);

        let queued = f.queue.list().await;
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].attempts, 0);
        assert_eq!(queued[0].last_error, None);
    }

    #[tokio::test]
    async fn test_rejection_does_not_block_later_actions() {
        let f = fixture(ScriptedRemote::new(vec![status(422), ok(None)]), true);
        f.queue.enqueue(update("1", "bogus")).await;
        f.queue.enqueue(update("2", "available")).await;

        let outcome = f.coordinator.run().await;

        assert_eq!(outcome, SyncOutcome::Synced { applied: 1, rejected: 1 });
        let remaining = f.queue.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].target_id, "1");
        assert!(remaining[0].is_failed_fatal());
        assert_eq!(remaining[0].last_error.as_deref(), Some("HTTP 422"));

        // Failed-fatal actions are not retried automatically
        assert_eq!(f.coordinator.run().await, SyncOutcome::NoOp);
        assert_eq!(f.remote.seen.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_stops_drain_and_counts_attempt() {
        let f = fixture(ScriptedRemote::new(vec![status(503), status(503), status(503), status(503)]), true);
        f.queue.enqueue(update("1", "x")).await;
        f.queue.enqueue(update("2", "y")).await;

        assert_eq!(f.coordinator.run().await, SyncOutcome::Interrupted { applied: 0 });
        assert_eq!(f.remote.seen_targets().await, vec!["1"]);
        assert_eq!(f.queue.list().await[0].attempts, 1);

        // Three retries allowed; the fourth failure is fatal
        f.coordinator.run().await;
        f.coordinator.run().await;
        f.coordinator.run().await;
        let head = &f.queue.list().await[0];
        assert_eq!(head.attempts, 4);
        assert!(head.is_failed_fatal());

        // Action 2 goes through once 1 is out of the way
        assert_eq!(f.coordinator.run().await, SyncOutcome::Synced { applied: 1, rejected: 0 });
        assert_eq!(f.queue.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reentrant_run_is_noop_and_in_flight_cannot_be_discarded() {
        let gate = Arc::new(Notify::new());
        let f = fixture(ScriptedRemote::gated(gate.clone()), true);
        f.queue.enqueue(update("1", "x")).await;
        let id = f.queue.list().await[0].id;

        let running = {
            let coordinator = f.coordinator.clone();
            tokio::spawn(async move { coordinator.run().await })
        };

        // Wait until the drain is parked inside dispatch
        while f.remote.seen.lock().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.coordinator.state().status, SyncStatus::Syncing);
        assert_eq!(f.coordinator.run().await, SyncOutcome::NoOp);
        assert!(!f.queue.discard(id).await);

        gate.notify_one();
        let outcome = running.await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { applied: 1, rejected: 0 });
        assert_eq!(f.coordinator.state().status, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_maintenance_log_response_is_cached() {
        let f = fixture(
            ScriptedRemote::new(vec![ok(Some(json!({"id": "ml-77", "equipmentId": "5", "note": "filter swap"})))]),
            true,
        );
        f.queue
            .enqueue(ActionDraft::maintenance_log_add("5", json!({"equipmentId": "5", "note": "filter swap"})))
            .await;

        f.coordinator.run().await;

        let log = f.cache.get(EntityType::MaintenanceLog, "ml-77").await.unwrap();
        assert_eq!(log["note"], "filter swap");
        assert!(f.cache.get(EntityType::Equipment, "5").await.is_none());
    }

    #[tokio::test]
    async fn test_last_synced_at_survives_restart() {
        let f = fixture(ScriptedRemote::default(), true);
        f.queue.enqueue(update("1", "x")).await;
        f.coordinator.run().await;
        let synced_at = f.coordinator.state().last_synced_at.unwrap();

        let store = Arc::new(LocalStore::new(&test_config(&f._dir)));
        let restarted = SyncCoordinator::new(
            store.clone(),
            RecordCache::new(store.clone()),
            Arc::new(ActionQueue::new(store, 3)),
            f.remote.clone(),
            f.monitor.clone(),
        );
        restarted.restore().await;

        let restored = restarted.state().last_synced_at.unwrap();
        assert_eq!(format_timestamp(restored), format_timestamp(synced_at));
    }
}
