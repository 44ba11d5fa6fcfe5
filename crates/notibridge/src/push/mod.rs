//! Persistent authenticated push channel to the backend.
//!
//! The connection manager owns one WebSocket to the backend and keeps it
//! alive: connect, authenticate with a session token, ping periodically,
//! and on any involuntary drop reconnect with bounded exponential backoff.
//! Lifecycle transitions and pushed notifications surface as typed
//! [`PushEvent`]s on a bounded channel; the orchestrator consumes them to
//! start and stop the polling fallback.
//!
//! Timers are owned by the management task: the keep-alive interval lives
//! inside the session loop and dies with it, and the reconnect sleep races
//! the shutdown signal, so nothing fires after [`ConnectionManager::disconnect`]
//! returns.

mod error;

pub use error::{PushError, Result};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, error, info, trace, warn};

use notibridge_protocol::{ClientFrame, Notification, ServerFrame};

use crate::backend::TokenSource;
use crate::config::PushConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// State & Events
// ============================================================================

/// The connection's lifecycle state. Exactly one is active at a time;
/// `Connected` is the only state in which keep-alive pings run and the
/// polling fallback should be suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    Exhausted,
}

/// Snapshot of the connection, published on a watch channel.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_connected_at: None,
        }
    }
}

/// Lifecycle and payload events emitted by the connection manager.
#[derive(Debug)]
pub enum PushEvent {
    /// Transport connected and the auth handshake succeeded.
    Connected,
    /// The connection dropped involuntarily; reconnection is already
    /// scheduled (or exhausted, in which case `ReconnectsExhausted` follows).
    Disconnected { reason: String },
    /// A notification arrived on the push channel.
    Notification(Notification),
    /// A background reconnect attempt failed. Informational only.
    Error { message: String },
    /// The reconnect ceiling was hit; the push channel has given up and
    /// the bridge runs on polling alone until restarted.
    ReconnectsExhausted,
}

/// Settings for the push channel, derived from [`PushConfig`].
#[derive(Debug, Clone)]
pub struct PushSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub ping_interval: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl PushSettings {
    pub fn new(url: String, config: &PushConfig) -> Self {
        Self {
            url,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            auth_timeout: Duration::from_millis(config.auth_timeout_ms),
            ping_interval: Duration::from_millis(config.ping_interval_ms),
            reconnect_initial_delay: Duration::from_millis(config.reconnect_initial_delay_ms),
            reconnect_max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

// ============================================================================
// Connection Manager
// ============================================================================

struct ChannelTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager {
    settings: PushSettings,
    tokens: Arc<dyn TokenSource>,
    event_tx: mpsc::Sender<PushEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    task: Option<ChannelTask>,
}

impl ConnectionManager {
    /// Create a manager and the receiver for its events.
    pub fn new(
        settings: PushSettings,
        tokens: Arc<dyn TokenSource>,
    ) -> (Self, mpsc::Receiver<PushEvent>) {
        let (event_tx, event_rx) = mpsc::channel(100);
        let (status_tx, _) = watch::channel(ConnectionStatus::default());

        let manager = Self {
            settings,
            tokens,
            event_tx,
            status_tx,
            task: None,
        };
        (manager, event_rx)
    }

    /// Establish the push channel.
    ///
    /// The first connection attempt reports its outcome to the caller. On
    /// failure the management task keeps retrying in the background with
    /// exponential backoff regardless, so an `Err` here means "not connected
    /// yet", not "gave up". Calling `connect()` while already running is a
    /// no-op.
    pub async fn connect(&mut self) -> Result<()> {
        if let Some(task) = &self.task {
            if !task.handle.is_finished() {
                debug!("push channel already running");
                return Ok(());
            }
            self.task = None;
        }

        // A fresh channel starts its attempt budget from zero, even after a
        // previous task exhausted its own.
        self.status_tx.send_modify(|s| s.reconnect_attempts = 0);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (first_tx, first_rx) = oneshot::channel();

        let handle = tokio::spawn(run_channel(
            self.settings.clone(),
            self.tokens.clone(),
            self.event_tx.clone(),
            self.status_tx.clone(),
            shutdown_rx,
            first_tx,
        ));

        self.task = Some(ChannelTask {
            shutdown_tx,
            handle,
        });

        first_rx
            .await
            .unwrap_or_else(|_| Err(PushError::Closed("channel task exited".to_string())))
    }

    /// Voluntary teardown: cancel any pending reconnect, stop the keep-alive,
    /// close the transport. Never triggers auto-reconnect.
    pub async fn disconnect(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        info!("disconnecting push channel");
        let _ = task.shutdown_tx.send(true);
        let _ = task.handle.await;

        // Covers the case where the task had already stopped (exhausted).
        self.status_tx.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
        });
    }

    /// True only when transport and application-level auth are both up.
    pub fn is_connected(&self) -> bool {
        self.status_tx.borrow().state == ConnectionState::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch channel for observing state transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }
}

// ============================================================================
// Management Task
// ============================================================================

/// Why the session loop returned.
enum SessionEnd {
    /// `disconnect()` was called; tear down silently.
    Shutdown,
    /// The transport dropped or errored; feed the reconnection policy.
    Lost(String),
}

/// Reconnect delay for attempt `n` (1-based): `min(initial * 2^(n-1), max)`.
fn reconnect_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay_ms = (initial.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(delay_ms).min(max)
}

/// Owns the socket for its whole lifetime: connect, authenticate, run the
/// session, and reconnect with backoff until shutdown or exhaustion.
async fn run_channel(
    settings: PushSettings,
    tokens: Arc<dyn TokenSource>,
    events: mpsc::Sender<PushEvent>,
    status: watch::Sender<ConnectionStatus>,
    mut shutdown: watch::Receiver<bool>,
    first_result: oneshot::Sender<Result<()>>,
) {
    let mut first_result = Some(first_result);

    loop {
        match establish(&settings, tokens.as_ref(), &status).await {
            Ok(stream) => {
                status.send_modify(|s| {
                    s.state = ConnectionState::Connected;
                    s.reconnect_attempts = 0;
                    s.last_connected_at = Some(Utc::now());
                });
                info!(url = %settings.url, "push channel connected and authenticated");

                if let Some(tx) = first_result.take() {
                    let _ = tx.send(Ok(()));
                }
                let _ = events.send(PushEvent::Connected).await;

                match run_session(stream, &settings, &events, &mut shutdown).await {
                    SessionEnd::Shutdown => {
                        status.send_modify(|s| s.state = ConnectionState::Disconnected);
                        debug!("push channel task stopped");
                        return;
                    }
                    SessionEnd::Lost(reason) => {
                        warn!(reason = %reason, "push channel lost");
                        let _ = events.send(PushEvent::Disconnected { reason }).await;
                    }
                }
            }
            Err(e) => {
                if matches!(e, PushError::Auth(_)) {
                    // A rejected token must not be presented again.
                    tokens.invalidate().await;
                }
                match first_result.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e));
                    }
                    None => {
                        let _ = events
                            .send(PushEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
            }
        }

        // Reconnection policy: increment before computing the delay.
        let attempt = {
            let mut attempt = 0;
            status.send_modify(|s| {
                s.reconnect_attempts += 1;
                attempt = s.reconnect_attempts;
            });
            attempt
        };

        if attempt > settings.max_reconnect_attempts {
            error!(
                max_attempts = settings.max_reconnect_attempts,
                "reconnect attempts exhausted, push channel giving up"
            );
            status.send_modify(|s| s.state = ConnectionState::Exhausted);
            let _ = events.send(PushEvent::ReconnectsExhausted).await;
            return;
        }

        let delay = reconnect_delay(
            attempt,
            settings.reconnect_initial_delay,
            settings.reconnect_max_delay,
        );
        info!(
            attempt,
            max_attempts = settings.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        status.send_modify(|s| s.state = ConnectionState::Reconnecting);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                status.send_modify(|s| s.state = ConnectionState::Disconnected);
                debug!("reconnect cancelled by disconnect");
                return;
            }
        }
    }
}

/// One connection attempt: transport connect, then the auth handshake.
async fn establish(
    settings: &PushSettings,
    tokens: &dyn TokenSource,
    status: &watch::Sender<ConnectionStatus>,
) -> Result<WsStream> {
    status.send_modify(|s| s.state = ConnectionState::Connecting);
    debug!(url = %settings.url, "connecting push channel");

    let (mut stream, _) = tokio::time::timeout(settings.connect_timeout, connect_async(&settings.url))
        .await
        .map_err(|_| PushError::Timeout("transport connect"))??;

    status.send_modify(|s| s.state = ConnectionState::Authenticating);

    let token = tokens.token().await?;
    let frame = serde_json::to_string(&ClientFrame::Auth { token })?;
    stream.send(Message::text(frame)).await?;

    await_auth_result(&mut stream, settings.auth_timeout).await?;
    Ok(stream)
}

/// Wait for exactly one auth result, bounded by the auth timeout.
///
/// Frames other than the auth result arriving before it are ignored; the
/// backend should not send any, and dropping them is safer than processing
/// notifications on an unauthenticated session.
async fn await_auth_result(stream: &mut WsStream, timeout: Duration) -> Result<()> {
    let wait = async {
        while let Some(msg) = stream.next().await {
            let msg = msg?;
            let Message::Text(text) = msg else {
                continue;
            };

            match serde_json::from_str::<ServerFrame>(text.as_str()) {
                Ok(ServerFrame::AuthResult { success: true, .. }) => return Ok(()),
                Ok(ServerFrame::AuthResult {
                    success: false,
                    message,
                }) => {
                    return Err(PushError::Auth(
                        message.unwrap_or_else(|| "rejected by backend".to_string()),
                    ));
                }
                Ok(other) => {
                    debug!(frame = ?other, "ignoring frame before auth result");
                }
                Err(e) => {
                    debug!(error = %e, "ignoring unparseable frame during handshake");
                }
            }
        }
        Err(PushError::Closed(
            "closed during auth handshake".to_string(),
        ))
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| PushError::Timeout("auth result"))?
}

/// The steady-state loop on an authenticated connection: forward pushed
/// notifications, send keep-alive pings, react to shutdown.
async fn run_session(
    mut stream: WsStream,
    settings: &PushSettings,
    events: &mpsc::Sender<PushEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    // First ping one interval from now, not immediately after the handshake.
    let start = tokio::time::Instant::now() + settings.ping_interval;
    let mut ping = tokio::time::interval_at(start, settings.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                let frame = match serde_json::to_string(&ClientFrame::Ping) {
                    Ok(frame) => frame,
                    Err(e) => {
                        // Ping is a unit variant; this cannot happen.
                        warn!(error = %e, "failed to encode ping frame");
                        continue;
                    }
                };
                if let Err(e) = stream.send(Message::text(frame)).await {
                    return SessionEnd::Lost(format!("ping failed: {e}"));
                }
                trace!("sent keep-alive ping");
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(text.as_str(), events).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "server close".to_string());
                        return SessionEnd::Lost(reason);
                    }
                    Some(Ok(_)) => {
                        // Transport-level ping/pong and binary frames carry
                        // nothing for us.
                    }
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("transport closed".to_string()),
                }
            }

            _ = shutdown.changed() => {
                let _ = stream.close(None).await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

/// Dispatch one inbound text frame from an authenticated session.
async fn handle_frame(text: &str, events: &mpsc::Sender<PushEvent>) {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::Notification(notification)) => {
            debug!(notification_id = %notification.id, "notification pushed");
            let _ = events.send(PushEvent::Notification(notification)).await;
        }
        // The handshake already consumed its auth result; a late duplicate
        // must not disturb an established session.
        Ok(ServerFrame::AuthResult { .. }) => {
            debug!("ignoring late auth result on established session");
        }
        Ok(ServerFrame::Pong) => {
            trace!("keep-alive pong received");
        }
        Err(e) => {
            warn!(error = %e, "unparseable frame on push channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_doubles_from_initial() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(60);

        let delays: Vec<u64> = (1..=6)
            .map(|n| reconnect_delay(n, initial, max).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32]);
    }

    #[test]
    fn test_reconnect_delay_caps_at_max() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(60);

        assert_eq!(reconnect_delay(7, initial, max), Duration::from_secs(60));
        assert_eq!(reconnect_delay(10, initial, max), Duration::from_secs(60));
        // Large attempt numbers must not overflow.
        assert_eq!(reconnect_delay(u32::MAX, initial, max), max);
    }

    #[test]
    fn test_default_status_is_disconnected() {
        let status = ConnectionStatus::default();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.reconnect_attempts, 0);
        assert!(status.last_connected_at.is_none());
    }
}
