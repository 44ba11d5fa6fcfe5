use std::path::Path;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    /// Load and validate the config file.
    ///
    /// Unlike tools that can run unconfigured, the bridge is useless without
    /// backend credentials and a bot token, so a missing file is an error
    /// rather than a silent fallback to defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).await?;
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }
}

// ============================================================================
// BackendConfig
// ============================================================================

/// Connection details for the game backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// REST base URL, e.g. `https://backend.example.com`.
    pub url: String,
    /// Service account used to obtain session tokens.
    pub email: String,
    pub password: String,
}

impl BackendConfig {
    /// WebSocket endpoint derived from the REST base URL.
    ///
    /// `https://` becomes `wss://`, `http://` becomes `ws://`; the push
    /// channel is always served under `/ws`.
    pub fn websocket_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/ws")
    }
}

// ============================================================================
// TelegramConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

// ============================================================================
// PushConfig
// ============================================================================

/// Tuning knobs for the push channel. Every field has a production-safe
/// default; most deployments only ever set `backend` and `telegram`.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// How long to wait for the TCP/TLS/WebSocket handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long to wait for the backend's auth result after connecting.
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    /// Keep-alive ping cadence on a healthy session.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// First reconnect delay; doubles on each failed attempt.
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    /// Ceiling for the doubling reconnect delay.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before the channel gives up for good.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            auth_timeout_ms: default_auth_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

// ============================================================================
// FallbackConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    /// Poll cadence while the push channel is down.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_auth_timeout_ms() -> u64 {
    10_000
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_reconnect_initial_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$` (only needed before `{` to prevent expansion)
///
/// No nested expansion: `${VAR:-${OTHER}}` is not supported. An unclosed
/// `${` (missing `}`) is an error.
///
/// # Examples
///
/// ```yaml
/// backend:
///   url: ${BACKEND_URL:-http://localhost:3000}
///   email: ${BACKEND_EMAIL}
///   password: ${BACKEND_PASSWORD}
/// telegram:
///   bot_token: ${TELEGRAM_BOT_TOKEN}
/// ```
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            // `$$` escapes a literal dollar sign.
            out.push('$');
            rest = tail;
        } else if let Some(reference) = after.strip_prefix('{') {
            let Some(end) = reference.find('}') else {
                return Err(ConfigError::UnclosedVarReference);
            };
            out.push_str(&resolve_var(&reference[..end])?);
            rest = &reference[end + 1..];
        } else {
            // Plain `$` not followed by `{` stays literal.
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Resolve the inside of a `${...}` reference against the environment.
fn resolve_var(reference: &str) -> Result<String, ConfigError> {
    let (name, default) = match reference.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (reference, None),
    };

    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(_) => match default {
            Some(d) => Ok(d.to_string()),
            None => Err(ConfigError::MissingEnvVar(name.to_string())),
        },
    }
}

// ============================================================================
// Tests
// ============================================================================
