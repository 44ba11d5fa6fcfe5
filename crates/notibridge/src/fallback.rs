//! Pull-based fallback for when the push channel is down.
//!
//! While the WebSocket is not confirmed connected, the bridge periodically
//! asks the backend for notifications it still considers undelivered and
//! feeds them through the shared delivery handler. Polling is the only
//! channel-independent guarantee that nothing is lost during an extended
//! outage; the cost is latency bounded by the poll interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::NotificationGateway;
use crate::delivery::DeliveryHandler;

/// Snapshot of the fallback's activity, readable at any time.
#[derive(Debug, Clone, Default)]
pub struct FallbackStats {
    pub running: bool,
    pub polls_completed: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Handle to the poller task; present only while running.
struct Poller {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct PollingFallback {
    gateway: Arc<dyn NotificationGateway>,
    handler: Arc<DeliveryHandler>,
    interval: Duration,
    poller: Mutex<Option<Poller>>,
    stats_tx: watch::Sender<FallbackStats>,
}

impl PollingFallback {
    pub fn new(
        gateway: Arc<dyn NotificationGateway>,
        handler: Arc<DeliveryHandler>,
        interval: Duration,
    ) -> Self {
        let (stats_tx, _) = watch::channel(FallbackStats::default());
        Self {
            gateway,
            handler,
            interval,
            poller: Mutex::new(None),
            stats_tx,
        }
    }

    /// Start polling. Idempotent: a second call while running is a no-op.
    ///
    /// The first poll fires immediately, then one per interval. Ticks are
    /// serialized behind the previous poll and skipped rather than queued
    /// when a poll overruns the interval.
    pub async fn start(&self) {
        let mut poller = self.poller.lock().await;
        if poller.is_some() {
            debug!("polling fallback already running");
            return;
        }

        info!(interval_ms = self.interval.as_millis() as u64, "starting polling fallback");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let gateway = self.gateway.clone();
        let handler = self.handler.clone();
        let stats = self.stats_tx.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    // A poll in flight completes before the next select,
                    // so stop() never interrupts it mid-cycle.
                    _ = ticker.tick() => {
                        poll_once(gateway.as_ref(), &handler, &stats).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("polling fallback task stopped");
        });

        self.stats_tx.send_modify(|s| s.running = true);
        *poller = Some(Poller {
            shutdown_tx,
            handle,
        });
    }

    /// Stop polling. Idempotent. A poll already in flight finishes, but no
    /// new poll is scheduled afterwards.
    pub async fn stop(&self) {
        let mut poller = self.poller.lock().await;
        let Some(active) = poller.take() else {
            debug!("polling fallback already stopped");
            return;
        };

        info!("stopping polling fallback");
        let _ = active.shutdown_tx.send(()).await;
        let _ = active.handle.await;
        self.stats_tx.send_modify(|s| s.running = false);
    }

    pub fn is_running(&self) -> bool {
        self.stats_tx.borrow().running
    }

    pub fn stats(&self) -> FallbackStats {
        self.stats_tx.borrow().clone()
    }
}

/// One poll cycle: fetch the pending list and deliver each item.
///
/// A failure delivering one item is logged and does not abort the rest of
/// the cycle; an undelivered item simply stays pending at the backend.
async fn poll_once(
    gateway: &dyn NotificationGateway,
    handler: &DeliveryHandler,
    stats: &watch::Sender<FallbackStats>,
) {
    let pending = match gateway.pending_notifications().await {
        Ok(pending) => pending,
        Err(e) => {
            warn!(error = %e, "failed to fetch pending notifications");
            stats.send_modify(|s| s.last_error = Some(e.to_string()));
            return;
        }
    };

    if !pending.is_empty() {
        info!(count = pending.len(), "pulled pending notifications");
    }

    for notification in &pending {
        if let Err(e) = handler.deliver(notification).await {
            warn!(
                notification_id = %notification.id,
                error = %e,
                "failed to deliver pulled notification"
            );
        }
    }

    stats.send_modify(|s| {
        s.polls_completed += 1;
        s.last_poll_at = Some(Utc::now());
        s.last_error = None;
    });
}
