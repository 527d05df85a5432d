//! Offline engine facade
//!
//! `OfflineEngine` owns the local store, the record cache, the action queue,
//! the connectivity monitor and the sync coordinator, plus the control loop
//! that turns every settled offline→online transition into a sync run.
//!
//! None of the public methods return errors. Failures come back as `false`,
//! `None` or a failed-fatal queue entry and are logged.

use crate::cache::{merge_payload, payload_id, EntityType, RecordCache, WriteOrigin};
use crate::config::EngineConfig;
use crate::connectivity::{ConnectivityMonitor, HttpProbe, ReachabilityProbe, TaskGuard};
use crate::coordinator::{SyncCoordinator, SyncOutcome, SyncState, SyncStatus};
use crate::error::SyncResult;
use crate::queue::{ActionDraft, ActionQueue, PendingAction};
use crate::remote::{HttpRemote, RemoteApi};
use crate::stats::{self, CacheStats};
use crate::store::LocalStore;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

/// Offline-first engine
pub struct OfflineEngine {
    store: Arc<LocalStore>,
    cache: RecordCache,
    queue: Arc<ActionQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    coordinator: Arc<SyncCoordinator>,
    tasks: Mutex<Vec<TaskGuard>>,
}

impl OfflineEngine {
    /// Engine talking HTTP to `config.remote`, with the configured reachability probe
    pub async fn new(config: EngineConfig) -> SyncResult<Self> {
        let remote: Arc<dyn RemoteApi> = Arc::new(HttpRemote::new(&config.remote)?);
        let connectivity = Arc::new(ConnectivityMonitor::assume_online(config.settle_window()));

        let probe_task = match &config.probe {
            Some(probe) => match HttpProbe::new(probe.url.clone(), config.remote.request_timeout()) {
                Ok(http) => {
                    let http: Arc<dyn ReachabilityProbe> = Arc::new(http);
                    Some(connectivity.spawn_probe(http, probe.interval()))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reachability probe unavailable, assuming online");
                    None
                }
            },
            None => None,
        };

        let engine = Self::with_components(&config, remote, connectivity).await;
        if let Some(task) = probe_task {
            engine.tasks.lock().await.push(task);
        }
        Ok(engine)
    }

    /// Engine over caller-supplied remote and connectivity sources
    pub async fn with_components(
        config: &EngineConfig,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        let store = Arc::new(LocalStore::new(config));
        let cache = RecordCache::new(store.clone());
        let queue = Arc::new(ActionQueue::new(store.clone(), config.max_retries));
        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            cache.clone(),
            queue.clone(),
            remote,
            connectivity.clone(),
        ));
        coordinator.restore().await;

        let control = spawn_control_loop(&connectivity, coordinator.clone());

        tracing::info!(db_path = %config.db_path, online = connectivity.is_online(), "Offline engine started");

        Self {
            store,
            cache,
            queue,
            connectivity,
            coordinator,
            tasks: Mutex::new(vec![control]),
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// The monitor, for hosts that feed their own reachability readings
    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// Queue contents in FIFO order, failed-fatal actions included
    pub async fn pending_actions(&self) -> Vec<PendingAction> {
        self.queue.list().await
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.coordinator.state().status
    }

    pub fn sync_state(&self) -> SyncState {
        self.coordinator.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.coordinator.subscribe()
    }

    /// Queue a raw action; the cache is left alone
    pub async fn queue_offline_action(&self, draft: ActionDraft) -> bool {
        self.queue.enqueue(draft).await
    }

    /// Bulk load server state into the cache
    pub async fn cache_equipment(&self, list: &[serde_json::Value]) {
        self.cache.put_many(EntityType::Equipment, list).await;
    }

    /// Apply `patch` locally and queue a full-representation `PUT`.
    ///
    /// Returns whether the change was cached and queued, not whether it reached
    /// the server.
    pub async fn update_equipment_offline(&self, id: &str, patch: serde_json::Value) -> bool {
        if !patch.is_object() {
            tracing::warn!(id = id, "Equipment patch must be a JSON object");
            return false;
        }

        let current = self.cache.get(EntityType::Equipment, id).await;
        let mut merged = merge_payload(current.as_ref(), &patch);
        if let Some(fields) = merged.as_object_mut() {
            fields.entry("id").or_insert_with(|| serde_json::Value::String(id.to_string()));
        }

        if !self
            .write_and_queue(EntityType::Equipment, id, ActionDraft::equipment_update(id, merged))
            .await
        {
            return false;
        }

        self.sync_inline().await;
        true
    }

    /// Queue a maintenance log for `record.equipmentId`.
    ///
    /// A record carrying its own `id` is also cached as a maintenance log.
    pub async fn add_maintenance_log_offline(&self, record: serde_json::Value) -> bool {
        let Some(equipment_id) = equipment_ref(&record) else {
            tracing::warn!("Maintenance log without equipmentId refused");
            return false;
        };

        let log_id = payload_id(&record);
        let draft = ActionDraft::maintenance_log_add(&equipment_id, record);
        let accepted = match log_id {
            Some(log_id) => self.write_and_queue(EntityType::MaintenanceLog, &log_id, draft).await,
            None => self.queue.enqueue(draft).await,
        };
        if !accepted {
            return false;
        }

        self.sync_inline().await;
        true
    }

    /// Cache a new equipment record and queue its `POST /equipment`.
    ///
    /// Records without an `id` get a local one.
    pub async fn create_equipment_offline(&self, mut record: serde_json::Value) -> bool {
        if !record.is_object() {
            tracing::warn!("Equipment record must be a JSON object");
            return false;
        }
        let id = match payload_id(&record) {
            Some(id) => id,
            None => {
                let local = Uuid::new_v4().to_string();
                if let Some(fields) = record.as_object_mut() {
                    fields.insert("id".to_string(), serde_json::Value::String(local.clone()));
                }
                local
            }
        };

        if !self
            .write_and_queue(EntityType::Equipment, &id, ActionDraft::equipment_create(&id, record))
            .await
        {
            return false;
        }

        self.sync_inline().await;
        true
    }

    /// Drain the queue now; `true` when at least one action was applied
    pub async fn sync_pending_actions(&self) -> bool {
        self.sync_now().await.applied_any()
    }

    pub async fn sync_now(&self) -> SyncOutcome {
        self.coordinator.run().await
    }

    pub async fn get_cache_stats(&self) -> Option<CacheStats> {
        stats::collect(&self.cache, &self.queue).await
    }

    pub async fn get_cached(&self, entity_type: EntityType, id: &str) -> Option<serde_json::Value> {
        self.cache.get(entity_type, id).await
    }

    /// Drop a queued action and roll back its optimistic change.
    ///
    /// The record then shows the newest change still queued for it, or its
    /// confirmed state when none is left.
    pub async fn discard_action(&self, id: Uuid) -> bool {
        let actions = self.queue.list().await;
        let Some(action) = actions.iter().find(|a| a.id == id) else {
            return false;
        };
        if !self.queue.discard(id).await {
            return false;
        }

        if let Some(key) = action.cache_key() {
            let newest_remaining = actions
                .iter()
                .rev()
                .find(|a| a.id != id && a.cache_key().as_ref() == Some(&key))
                .map(|a| a.payload.clone());
            let (entity_type, record_id) = key;
            self.restore_override(entity_type, &record_id, newest_remaining).await;
        }
        true
    }

    /// Put a failed-fatal action back into automatic sync
    pub async fn retry_action(&self, id: Uuid) -> bool {
        self.queue.retry(id).await
    }

    /// Stop background tasks and close the store
    pub async fn shutdown(&self) {
        self.tasks.lock().await.clear();
        self.store.close().await;
        tracing::info!("Offline engine stopped");
    }

    /// Write the optimistic half of `draft`, then queue it. A refused enqueue
    /// puts the record's previous override back.
    async fn write_and_queue(&self, entity_type: EntityType, id: &str, draft: ActionDraft) -> bool {
        let previous = self
            .cache
            .entry(entity_type, id)
            .await
            .and_then(|e| e.optimistic_override);

        if !self
            .cache
            .put_one(entity_type, id, &draft.payload, WriteOrigin::Optimistic)
            .await
        {
            return false;
        }
        if !self.queue.enqueue(draft).await {
            tracing::warn!(entity_type = %entity_type, id = id, "Action not queued, rolling back local change");
            self.restore_override(entity_type, id, previous).await;
            return false;
        }
        true
    }

    async fn restore_override(&self, entity_type: EntityType, id: &str, payload: Option<serde_json::Value>) -> bool {
        match payload {
            Some(payload) => {
                self.cache
                    .put_one(entity_type, id, &payload, WriteOrigin::Optimistic)
                    .await
            }
            None => self.cache.revert(entity_type, id).await,
        }
    }

    /// Single-action pass right after a mutation; the rest waits for the next drain
    async fn sync_inline(&self) {
        if self.connectivity.is_online() {
            let outcome = self.coordinator.run_next().await;
            tracing::debug!(?outcome, "Inline sync pass");
        }
    }
}

fn spawn_control_loop(connectivity: &ConnectivityMonitor, coordinator: Arc<SyncCoordinator>) -> TaskGuard {
    let mut events = connectivity.subscribe();
    TaskGuard::new(tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            coordinator.set_online(event.is_online());
            if event.is_online() {
                let outcome = coordinator.run().await;
                tracing::info!(?outcome, "Reconnect sync");
            }
        }
    }))
}

fn equipment_ref(record: &serde_json::Value) -> Option<String> {
    match record.get("equipmentId").or_else(|| record.get("equipment_id"))? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
