//! The single path from "notification observed" to "recipient messaged and
//! backend told so".
//!
//! Both the push channel and the polling fallback hand their notifications
//! to [`DeliveryHandler::deliver`]. The ordering contract lives here: the
//! backend is acknowledged only after the Telegram send succeeded. A failed
//! send leaves the notification pending at the backend, so a later poll
//! retries it; that is what turns a transient send failure into at-least-once
//! delivery instead of silent loss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use notibridge_protocol::Notification;

use crate::backend::{ClientError, NotificationGateway};
use crate::telegram::Messenger;

/// How long a delivered notification id is remembered.
///
/// Near a failover boundary the push channel and a poll can both observe
/// the same pending notification; the cache suppresses the duplicate send
/// during that window. The backend's ack bookkeeping remains the source of
/// truth beyond it.
const DEDUP_TTL: Duration = Duration::from_secs(5 * 60);

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The Telegram send failed; the notification stays pending.
    #[error("send to {recipient_id} failed: {message}")]
    Send { recipient_id: i64, message: String },

    /// The ack failed after a successful send. Logged, never propagated:
    /// the accepted cost is one possible duplicate on the next poll.
    #[error("ack failed: {0}")]
    Ack(#[from] ClientError),
}

pub struct DeliveryHandler {
    messenger: Arc<dyn Messenger>,
    gateway: Arc<dyn NotificationGateway>,
    recently_delivered: Mutex<HashMap<String, Instant>>,
}

impl DeliveryHandler {
    pub fn new(messenger: Arc<dyn Messenger>, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self {
            messenger,
            gateway,
            recently_delivered: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver one notification: format, send, then acknowledge.
    ///
    /// Returns an error only when the send itself failed. An ack failure is
    /// logged and swallowed; the message already reached the recipient.
    pub async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        if self.seen_recently(&notification.id).await {
            debug!(
                notification_id = %notification.id,
                "already delivered recently, skipping duplicate"
            );
            return Ok(());
        }

        let text = format_message(notification);
        self.messenger
            .send(notification.recipient_id, &text)
            .await
            .map_err(|message| DeliveryError::Send {
                recipient_id: notification.recipient_id,
                message,
            })?;

        // Only successful sends enter the dedup cache; a failed send must
        // stay retryable.
        self.remember(&notification.id).await;

        match self.gateway.mark_delivered(&notification.id).await {
            Ok(()) => {
                info!(
                    notification_id = %notification.id,
                    recipient_id = notification.recipient_id,
                    "notification delivered and acknowledged"
                );
            }
            Err(e) => {
                let err = DeliveryError::Ack(e);
                warn!(
                    notification_id = %notification.id,
                    error = %err,
                    "delivered but ack failed, backend may redeliver"
                );
            }
        }

        Ok(())
    }

    async fn seen_recently(&self, id: &str) -> bool {
        let cache = self.recently_delivered.lock().await;
        cache
            .get(id)
            .is_some_and(|seen_at| seen_at.elapsed() < DEDUP_TTL)
    }

    async fn remember(&self, id: &str) {
        let mut cache = self.recently_delivered.lock().await;
        cache.retain(|_, seen_at| seen_at.elapsed() < DEDUP_TTL);
        cache.insert(id.to_string(), Instant::now());
    }
}

/// Render a notification as a Telegram HTML message.
fn format_message(notification: &Notification) -> String {
    format!(
        "<b>{} {}</b>\n\n{}",
        notification.event_type.icon(),
        escape_html(&notification.title),
        escape_html(&notification.body),
    )
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
