//! Composition root wiring the push channel to the polling fallback.
//!
//! The orchestrator is the only code allowed to start or stop the fallback.
//! It consumes the connection manager's events: on `Connected` the fallback
//! stops, on `Disconnected` it starts, and pushed notifications flow into
//! the shared delivery handler. Brief overlap of the two channels during a
//! transition is tolerated; the delivery handler's at-least-once contract
//! (plus its dedup cache) absorbs it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::delivery::DeliveryHandler;
use crate::fallback::PollingFallback;
use crate::push::{ConnectionManager, PushEvent};

pub struct Orchestrator {
    manager: ConnectionManager,
    fallback: Arc<PollingFallback>,
    handler: Arc<DeliveryHandler>,
    events: mpsc::Receiver<PushEvent>,
}

impl Orchestrator {
    pub fn new(
        manager: ConnectionManager,
        fallback: Arc<PollingFallback>,
        handler: Arc<DeliveryHandler>,
        events: mpsc::Receiver<PushEvent>,
    ) -> Self {
        Self {
            manager,
            fallback,
            handler,
            events,
        }
    }

    /// Bring the bridge up and run until `shutdown` resolves.
    ///
    /// The push channel is attempted first; if the initial attempt fails the
    /// fallback starts immediately while reconnection continues in the
    /// background, so no notification waits for the push channel to recover.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        match self.manager.connect().await {
            Ok(()) => info!("push channel up, starting in push mode"),
            Err(e) => {
                warn!(error = %e, "initial push connect failed, starting in polling mode");
                self.fallback.start().await;
            }
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down bridge");
                    break;
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        error!("push event channel closed");
                        break;
                    };
                    self.handle_event(event).await;
                }
            }
        }

        self.manager.disconnect().await;
        self.fallback.stop().await;
    }

    async fn handle_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::Connected => {
                self.fallback.stop().await;
            }

            PushEvent::Disconnected { reason } => {
                warn!(reason = %reason, "push channel down, activating fallback");
                self.fallback.start().await;
            }

            PushEvent::Notification(notification) => {
                if let Err(e) = self.handler.deliver(&notification).await {
                    // Not acked, so the backend keeps it pending and a later
                    // poll retries it.
                    warn!(
                        notification_id = %notification.id,
                        error = %e,
                        "failed to deliver pushed notification"
                    );
                }
            }

            PushEvent::Error { message } => {
                warn!(error = %message, "push channel error");
            }

            PushEvent::ReconnectsExhausted => {
                error!("push channel exhausted its reconnect attempts, polling-only from here");
                self.fallback.start().await;
            }
        }
    }
}
