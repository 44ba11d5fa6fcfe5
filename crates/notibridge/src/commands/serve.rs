//! Bridge runtime command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;

use notibridge::backend::{BackendClient, TokenProvider};
use notibridge::config::Config;
use notibridge::delivery::DeliveryHandler;
use notibridge::fallback::PollingFallback;
use notibridge::orchestrator::Orchestrator;
use notibridge::push::{ConnectionManager, PushSettings};
use notibridge::telegram::TelegramMessenger;

pub async fn run(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)
        .await
        .with_context(|| format!("loading config: {config_path}"))?;

    info!(backend = %config.backend.url, "starting notibridge");

    let tokens = Arc::new(TokenProvider::new(
        &config.backend.url,
        &config.backend.email,
        &config.backend.password,
    ));
    let gateway = Arc::new(BackendClient::new(&config.backend.url, tokens.clone()));
    let messenger = Arc::new(TelegramMessenger::new(&config.telegram.bot_token));

    let handler = Arc::new(DeliveryHandler::new(messenger, gateway.clone()));
    let fallback = Arc::new(PollingFallback::new(
        gateway,
        handler.clone(),
        Duration::from_millis(config.fallback.poll_interval_ms),
    ));

    let settings = PushSettings::new(config.backend.websocket_url(), &config.push);
    let (manager, events) = ConnectionManager::new(settings, tokens);

    let orchestrator = Orchestrator::new(manager, fallback, handler, events);
    orchestrator
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("notibridge stopped");
    Ok(())
}
