//! Connectivity monitor
//!
//! Raw reachability readings go in through [`ConnectivityMonitor::report`] (or
//! a polling [`ReachabilityProbe`]). A reading only becomes the settled state
//! once it has held for the whole settle window, and subscribers get exactly
//! one [`ConnectivityEvent`] per settled transition.
//!
//! When the platform cannot tell whether the network is reachable the monitor
//! assumes it is online.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 16;

/// A settled connectivity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityEvent::Online)
    }
}

/// Source of raw reachability readings
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// `None` when the platform primitive cannot answer
    async fn check(&self) -> Option<bool>;
}

/// Probe that treats any HTTP response from `url` as reachable
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build probe client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> Option<bool> {
        match self.client.head(&self.url).send().await {
            Ok(_) => Some(true),
            Err(e) if e.is_builder() => {
                tracing::debug!(url = %self.url, error = %e, "Probe request cannot be built");
                None
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Probe unreachable");
                Some(false)
            }
        }
    }
}

/// Receiver of settled transitions
pub struct Subscription {
    rx: broadcast::Receiver<ConnectivityEvent>,
}

impl Subscription {
    /// Next transition; `None` once the monitor is gone
    pub async fn recv(&mut self) -> Option<ConnectivityEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Connectivity subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Transition already delivered, without waiting
    pub fn try_recv(&mut self) -> Option<ConnectivityEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Keeps a background task alive; aborts it on drop
pub struct TaskGuard {
    handle: JoinHandle<()>,
}

impl TaskGuard {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Debounced online/offline signal
pub struct ConnectivityMonitor {
    raw_tx: Arc<watch::Sender<bool>>,
    settled_rx: watch::Receiver<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
    _settler: TaskGuard,
}

impl ConnectivityMonitor {
    /// Create a monitor. `initial` is the platform's first reading; `None`
    /// means the platform cannot tell and the monitor starts online.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(initial: Option<bool>, settle_window: Duration) -> Self {
        let online = initial.unwrap_or_else(|| {
            tracing::debug!("No connectivity reading available, assuming online");
            true
        });

        let (raw_tx, raw_rx) = watch::channel(online);
        let (settled_tx, settled_rx) = watch::channel(online);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let settler = tokio::spawn(settle_loop(raw_rx, settled_tx, events.clone(), settle_window));

        Self {
            raw_tx: Arc::new(raw_tx),
            settled_rx,
            events,
            _settler: TaskGuard::new(settler),
        }
    }

    /// Monitor for platforms without a connectivity primitive
    pub fn assume_online(settle_window: Duration) -> Self {
        Self::new(None, settle_window)
    }

    /// Settled connectivity state
    pub fn is_online(&self) -> bool {
        *self.settled_rx.borrow()
    }

    /// Feed a raw reading
    pub fn report(&self, reachable: bool) {
        self.raw_tx.send_replace(reachable);
    }

    /// Watch the settled state
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.settled_rx.clone()
    }

    /// Subscribe to settled transitions
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.events.subscribe(),
        }
    }

    /// Call `listener` on every settled transition until the guard is dropped
    pub fn on_change<F>(&self, listener: F) -> TaskGuard
    where
        F: Fn(ConnectivityEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        TaskGuard::new(tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                listener(event);
            }
        }))
    }

    /// Poll `probe` every `interval` and report its readings
    pub fn spawn_probe(&self, probe: Arc<dyn ReachabilityProbe>, interval: Duration) -> TaskGuard {
        let raw_tx = self.raw_tx.clone();
        TaskGuard::new(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = probe.check().await.unwrap_or(true);
                raw_tx.send_replace(reachable);
            }
        }))
    }
}

async fn settle_loop(
    mut raw_rx: watch::Receiver<bool>,
    settled_tx: watch::Sender<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
    window: Duration,
) {
    while raw_rx.changed().await.is_ok() {
        let mut candidate = *raw_rx.borrow_and_update();

        // Restart the window on every new reading
        loop {
            tokio::select! {
                _ = tokio::time::sleep(window) => break,
                changed = raw_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    candidate = *raw_rx.borrow_and_update();
                }
            }
        }

        let transitioned = settled_tx.send_if_modified(|current| {
            if *current == candidate {
                false
            } else {
                *current = candidate;
                true
            }
        });

        if transitioned {
            let event = if candidate {
                tracing::info!("Network: online");
                ConnectivityEvent::Online
            } else {
                tracing::warn!("Network: offline");
                ConnectivityEvent::Offline
            };
            // No subscribers is fine
            let _ = events.send(event);
        }
    }
}
