//! Wire types for the Notibridge push channel.
//!
//! The push channel is a WebSocket between the bridge and the backend.
//! Both directions carry JSON text frames tagged with a `type` field:
//!
//! - **Client frames** (bridge → backend): session authentication and
//!   keep-alive pings.
//! - **Server frames** (backend → bridge): handshake results and pushed
//!   notifications.
//!
//! The [`Notification`] shape is shared with the REST polling endpoint, so
//! both the push and the pull path feed the identical delivery pipeline.
//!
//! # Example: Handshake
//!
//! ```ignore
//! use notibridge_protocol::{ClientFrame, ServerFrame};
//!
//! // The first frame after the socket opens authenticates the session.
//! let frame = ClientFrame::Auth { token };
//! ws.send(Message::text(serde_json::to_string(&frame)?)).await?;
//!
//! // The backend answers with an auth result before anything else.
//! let reply: ServerFrame = serde_json::from_str(text)?;
//! ```

use serde::{Deserialize, Serialize};

// ============================================================================
// Client frames (bridge → backend)
// ============================================================================

/// Frames sent from the bridge to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate the session. Must be the first frame after connect;
    /// the backend closes sockets that send anything else first.
    Auth { token: String },

    /// Application-level keep-alive, sent periodically on a healthy session.
    Ping,
}

// ============================================================================
// Server frames (backend → bridge)
// ============================================================================

/// Frames sent from the backend to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Outcome of an [`ClientFrame::Auth`] handshake.
    AuthResult {
        success: bool,
        /// Human-readable rejection reason when `success` is false.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A notification pushed to the bridge for delivery.
    Notification(Notification),

    /// Reply to a client [`ClientFrame::Ping`].
    Pong,
}

// ============================================================================
// Notifications
// ============================================================================

/// A single notification addressed to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Backend-assigned identifier, unique per event. Used to acknowledge
    /// delivery and to suppress near-simultaneous duplicates.
    pub id: String,

    /// Messaging-channel address of the recipient (Telegram chat id).
    pub recipient_id: i64,

    /// Short headline, rendered in bold.
    pub title: String,

    /// Message body, rendered below the title.
    pub body: String,

    /// Event category. Only used for presentation, never for routing.
    #[serde(default)]
    pub event_type: EventType,

    /// Event-specific structured data, passed through to presentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Notification categories known to the bridge.
///
/// Categories the bridge has never heard of deserialize as
/// [`EventType::Unknown`], so new backend events degrade to a generic
/// rendering instead of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PaymentApproved,
    PaymentRejected,
    WithdrawalApproved,
    WithdrawalRejected,
    RoomComplete,
    GameStarted,
    #[default]
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Icon prefixed to the rendered message for this category.
    pub fn icon(&self) -> &'static str {
        match self {
            EventType::PaymentApproved | EventType::WithdrawalApproved => "✅",
            EventType::PaymentRejected | EventType::WithdrawalRejected => "❌",
            EventType::RoomComplete => "🎮",
            EventType::GameStarted => "🎲",
            EventType::Unknown => "🔔",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_serialization() {
        let frame = ClientFrame::Auth {
            token: "jwt_abc".to_string(),
        };

        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"auth""#));

        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientFrame::Auth { token } => assert_eq!(token, "jwt_abc"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_server_frame_serialization() {
        let frame = ServerFrame::AuthResult {
            success: false,
            message: Some("token expired".to_string()),
        };

        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"auth_result""#));

        let parsed: ServerFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            ServerFrame::AuthResult { success, message } => {
                assert!(!success);
                assert_eq!(message.as_deref(), Some("token expired"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_notification_frame_flattens_fields() {
        let frame = ServerFrame::Notification(Notification {
            id: "n_001".to_string(),
            recipient_id: 42,
            title: "Payment approved".to_string(),
            body: "Your deposit was credited.".to_string(),
            event_type: EventType::PaymentApproved,
            payload: None,
        });

        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"notification""#));
        assert!(json.contains(r#""id":"n_001""#));
        assert!(json.contains(r#""event_type":"payment_approved""#));

        let parsed: ServerFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            ServerFrame::Notification(n) => {
                assert_eq!(n.recipient_id, 42);
                assert_eq!(n.event_type, EventType::PaymentApproved);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_unknown_event_type_parses() {
        let json = r#"{
            "id": "n_002",
            "recipient_id": 7,
            "title": "t",
            "body": "b",
            "event_type": "tournament_finished"
        }"#;

        let parsed: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.event_type, EventType::Unknown);
        assert_eq!(parsed.event_type.icon(), "🔔");
    }

    #[test]
    fn test_event_type_defaults_when_absent() {
        let json = r#"{"id":"n_003","recipient_id":7,"title":"t","body":"b"}"#;
        let parsed: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.event_type, EventType::Unknown);
        assert!(parsed.payload.is_none());
    }
}
