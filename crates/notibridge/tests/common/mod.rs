//! Common test utilities: an in-process push server and in-memory stand-ins
//! for the backend gateway and the Telegram messenger.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::protocol::Message};

use notibridge::backend::{ClientError, NotificationGateway, Result as BackendResult, TokenSource};
use notibridge::config::PushConfig;
use notibridge::push::PushSettings;
use notibridge::telegram::Messenger;
use notibridge_protocol::{ClientFrame, EventType, Notification, ServerFrame};

pub type ServerStream = WebSocketStream<TcpStream>;

/// An unsigned JWT whose `exp` claim is `exp` (unix seconds).
pub fn fake_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

pub fn notification(id: &str, recipient_id: i64) -> Notification {
    Notification {
        id: id.to_string(),
        recipient_id,
        title: "Deposit approved".to_string(),
        body: "Your deposit was credited.".to_string(),
        event_type: EventType::PaymentApproved,
        payload: None,
    }
}

/// Push settings tuned for tests: short timeouts, fast reconnects.
pub fn test_settings(url: String) -> PushSettings {
    PushSettings::new(
        url,
        &PushConfig {
            connect_timeout_ms: 1_000,
            auth_timeout_ms: 1_000,
            ping_interval_ms: 10_000,
            reconnect_initial_delay_ms: 10,
            reconnect_max_delay_ms: 40,
            max_reconnect_attempts: 3,
        },
    )
}

// ============================================================================
// Token source
// ============================================================================

/// Token source that hands out a fixed token and counts invalidations.
pub struct StaticTokens {
    pub token: String,
    pub invalidations: AtomicUsize,
}

impl StaticTokens {
    pub fn new(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_string(),
            invalidations: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TokenSource for StaticTokens {
    async fn token(&self) -> BackendResult<String> {
        Ok(self.token.clone())
    }

    async fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Messenger
// ============================================================================

/// Messenger that records sends instead of talking to Telegram.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, recipient_id: i64, html_text: &str) -> Result<(), String> {
        self.sent
            .lock()
            .await
            .push((recipient_id, html_text.to_string()));
        Ok(())
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// In-memory notification gateway: a pending list that shrinks as items
/// are acknowledged, like the real backend's bookkeeping.
#[derive(Default)]
pub struct MemoryGateway {
    pub pending: Mutex<Vec<Notification>>,
    pub acked: Mutex<Vec<String>>,
    pub polls: AtomicUsize,
}

impl MemoryGateway {
    pub fn with_pending(items: Vec<Notification>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(items),
            ..Self::default()
        })
    }
}

#[async_trait]
impl NotificationGateway for MemoryGateway {
    async fn pending_notifications(&self) -> BackendResult<Vec<Notification>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pending.lock().await.clone())
    }

    async fn mark_delivered(&self, id: &str) -> BackendResult<()> {
        let mut pending = self.pending.lock().await;
        if !pending.iter().any(|n| n.id == id) {
            return Err(ClientError::Api {
                status: 404,
                message: format!("unknown notification {id}"),
            });
        }
        pending.retain(|n| n.id != id);
        self.acked.lock().await.push(id.to_string());
        Ok(())
    }
}

// ============================================================================
// Push server
// ============================================================================

/// Accept one WebSocket connection and complete the server side of the
/// auth handshake, asserting the client presented `expected_token`.
pub async fn accept_and_auth(
    listener: &tokio::net::TcpListener,
    expected_token: &str,
) -> ServerStream {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut stream = accept_async(tcp).await.unwrap();

    let frame = read_client_frame(&mut stream).await;
    match frame {
        ClientFrame::Auth { token } => assert_eq!(token, expected_token),
        other => panic!("expected auth frame first, got {other:?}"),
    }

    send_server_frame(
        &mut stream,
        &ServerFrame::AuthResult {
            success: true,
            message: None,
        },
    )
    .await;

    stream
}

/// Accept one connection and reject its handshake.
pub async fn accept_and_reject(listener: &tokio::net::TcpListener, reason: &str) -> ServerStream {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut stream = accept_async(tcp).await.unwrap();

    let _ = read_client_frame(&mut stream).await;
    send_server_frame(
        &mut stream,
        &ServerFrame::AuthResult {
            success: false,
            message: Some(reason.to_string()),
        },
    )
    .await;

    stream
}

pub async fn read_client_frame(stream: &mut ServerStream) -> ClientFrame {
    loop {
        let msg = stream
            .next()
            .await
            .expect("client closed unexpectedly")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

pub async fn send_server_frame(stream: &mut ServerStream, frame: &ServerFrame) {
    let json = serde_json::to_string(frame).unwrap();
    stream.send(Message::text(json)).await.unwrap();
}
