//! Cache statistics

use crate::cache::{EntityType, RecordCache};
use crate::queue::ActionQueue;
use serde::{Deserialize, Serialize};

/// Aggregate counts over the cache and the queue.
///
/// `pending_action_count` is the queue length, failed-fatal actions included;
/// `failed_action_count` is the failed-fatal share of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub cached_equipment: u64,
    pub cached_maintenance_logs: u64,
    pub pending_action_count: u64,
    pub failed_action_count: u64,
}

/// `None` until the local store has been created
pub async fn collect(cache: &RecordCache, queue: &ActionQueue) -> Option<CacheStats> {
    let cached = cache.stats().await?;
    let counts = queue.counts().await.unwrap_or_default();

    Some(CacheStats {
        cached_equipment: cached.get(&EntityType::Equipment).copied().unwrap_or(0),
        cached_maintenance_logs: cached.get(&EntityType::MaintenanceLog).copied().unwrap_or(0),
        pending_action_count: counts.total(),
        failed_action_count: counts.failed_fatal,
    })
}
