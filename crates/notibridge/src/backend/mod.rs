//! HTTP client for the game backend's notification endpoints.
//!
//! Covers the pull side of the bridge: listing notifications the backend
//! still considers undelivered, and acknowledging the ones we managed to
//! send. Authentication is delegated to a [`TokenSource`]; a request that
//! comes back 401 invalidates the cached token and is retried once with a
//! fresh login.

mod auth;
mod error;

pub use auth::{TokenProvider, TokenSource};
pub use error::{ClientError, Result};

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use notibridge_protocol::Notification;

/// The backend operations the delivery pipeline depends on.
///
/// [`BackendClient`] is the production implementation; tests substitute an
/// in-memory one so delivery and fallback logic can run without HTTP.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Notifications the backend has not yet seen an ack for.
    async fn pending_notifications(&self) -> Result<Vec<Notification>>;

    /// Tell the backend a notification reached its recipient.
    async fn mark_delivered(&self, id: &str) -> Result<()>;
}

/// HTTP client for the backend's REST API.
pub struct BackendClient {
    base_url: String,
    http: Client,
    tokens: Arc<dyn TokenSource>,
}

impl BackendClient {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
            tokens,
        }
    }

    /// Issue an authenticated GET, retrying once with a fresh token on 401.
    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let token = self.tokens.token().await?;
        let response = self.http.get(url).bearer_auth(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(url, "token rejected, retrying with fresh login");
        self.tokens.invalidate().await;
        let token = self.tokens.token().await?;
        Ok(self.http.get(url).bearer_auth(&token).send().await?)
    }

    /// Issue an authenticated bodyless POST, retrying once on 401.
    async fn post(&self, url: &str) -> Result<reqwest::Response> {
        let token = self.tokens.token().await?;
        let response = self.http.post(url).bearer_auth(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(url, "token rejected, retrying with fresh login");
        self.tokens.invalidate().await;
        let token = self.tokens.token().await?;
        Ok(self.http.post(url).bearer_auth(&token).send().await?)
    }

    /// Parse an error response into a ClientError.
    async fn parse_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        if let Ok(body) = response.json::<ApiErrorBody>().await {
            ClientError::Api {
                status,
                message: body.message,
            }
        } else {
            ClientError::Api {
                status,
                message: format!("HTTP {status}"),
            }
        }
    }
}

#[async_trait]
impl NotificationGateway for BackendClient {
    async fn pending_notifications(&self) -> Result<Vec<Notification>> {
        let url = format!("{}/api/notifications/pending", self.base_url);
        let response = self.get(&url).await?;

        if response.status().is_success() {
            let body: PendingResponse = response.json().await?;
            Ok(body.notifications)
        } else {
            Err(self.parse_error(response).await)
        }
    }

    async fn mark_delivered(&self, id: &str) -> Result<()> {
        let url = format!("{}/api/notifications/{}/delivered", self.base_url, id);
        let response = self.post(&url).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.parse_error(response).await)
        }
    }
}

#[derive(Deserialize)]
struct PendingResponse {
    notifications: Vec<Notification>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}
