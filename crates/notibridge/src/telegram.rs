//! Outbound Telegram messaging via teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;

/// Outbound send capability of the chat platform.
///
/// The delivery handler depends on this seam rather than on teloxide, so
/// tests can count sends and inject failures without a bot token.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send an HTML-formatted message to a chat. Errors are surfaced as
    /// strings; the caller only needs them for logging and retry decisions.
    async fn send(&self, recipient_id: i64, html_text: &str) -> Result<(), String>;
}

/// [`Messenger`] backed by the Telegram Bot API.
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot_token: &str) -> Self {
        // Timeout must cover Telegram's server-side long-poll window.
        let client = teloxide::net::default_reqwest_settings()
            .timeout(std::time::Duration::from_secs(60))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            bot: Bot::with_client(bot_token, client),
        }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, recipient_id: i64, html_text: &str) -> Result<(), String> {
        self.bot
            .send_message(ChatId(recipient_id), html_text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
