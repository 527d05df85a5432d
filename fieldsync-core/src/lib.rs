//! Offline-first synchronization engine for Field Sync
//!
//! Provides:
//! - Local SQLite store for cached equipment records and queued mutations
//! - Two-phase record cache (server-confirmed state plus optimistic override)
//! - Durable FIFO action queue with retry ceiling and failed-fatal tagging
//! - Debounced connectivity monitor
//! - Sync coordinator that drains the queue when connectivity returns

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing))]

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod queue;
pub mod remote;
pub mod stats;
pub mod store;

pub use cache::{CachedEntity, EntityType, RecordCache, WriteOrigin};
pub use config::{EngineConfig, ProbeConfig, RemoteConfig};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, HttpProbe, ReachabilityProbe, Subscription, TaskGuard};
pub use coordinator::{SyncCoordinator, SyncOutcome, SyncState, SyncStatus};
pub use engine::OfflineEngine;
pub use error::{SyncError, SyncResult};
pub use queue::{ActionDraft, ActionKind, ActionQueue, ActionStatus, HttpMethod, PendingAction, QueueCounts};
pub use remote::{HttpRemote, RemoteApi, RemoteResponse};
pub use stats::CacheStats;
pub use store::LocalStore;
