//! Session token provider for the game backend.
//!
//! The backend issues JWTs from its login endpoint. Tokens are cached and
//! reused until they are close to expiry, so the push channel and the pull
//! endpoints share one login per token lifetime instead of logging in on
//! every request.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::{ClientError, Result};

/// Refresh the token this long before its `exp` claim.
const EXPIRY_BUFFER_SECS: i64 = 5 * 60;

/// Source of bearer tokens for authenticating against the backend.
///
/// The push channel and the HTTP client both depend on this seam rather
/// than on [`TokenProvider`] directly, so tests can substitute a fixed
/// token without a login endpoint.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a token believed to be valid right now.
    async fn token(&self) -> Result<String>;

    /// Drop the cached token so the next call performs a fresh login.
    ///
    /// Called when the backend rejects a token that we thought was valid.
    async fn invalidate(&self);
}

/// Caching token provider backed by the backend's login endpoint.
pub struct TokenProvider {
    base_url: String,
    email: String,
    password: String,
    http: Client,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    /// `exp` claim of the JWT; `None` when the payload could not be parsed,
    /// in which case the token is treated as already expired.
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() + chrono::Duration::seconds(EXPIRY_BUFFER_SECS) < exp,
            None => false,
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

impl TokenProvider {
    pub fn new(base_url: &str, email: &str, password: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            password: password.to_string(),
            http: Client::new(),
            cached: Mutex::new(None),
        }
    }

    /// Perform a login and return the fresh token.
    async fn login(&self) -> Result<String> {
        debug!("logging in to backend");
        let url = format!("{}/api/auth/login", self.base_url);
        let body = LoginRequest {
            email: &self.email,
            password: &self.password,
        };

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = match response.json::<ApiErrorBody>().await {
                Ok(body) => body.message,
                Err(_) => format!("HTTP {status}"),
            };
            return Err(ClientError::Api { status, message });
        }

        let body: LoginResponse = response.json().await?;
        body.token.ok_or(ClientError::MissingToken)
    }
}

#[async_trait]
impl TokenSource for TokenProvider {
    async fn token(&self) -> Result<String> {
        // Holding the lock across the login gives single-flight behavior:
        // concurrent callers wait here and then see the fresh cache.
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref()
            && entry.is_valid()
        {
            return Ok(entry.token.clone());
        }

        *cached = None;
        let token = self.login().await?;

        let expires_at = parse_jwt_expiry(&token);
        if expires_at.is_none() {
            warn!("could not parse exp claim from backend token");
        }
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        Ok(token)
    }

    async fn invalidate(&self) {
        let mut cached = self.cached.lock().await;
        if cached.take().is_some() {
            debug!("backend token invalidated");
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: i64,
}

/// Extract the `exp` claim (unix seconds) from a JWT without verifying it.
///
/// The bridge only needs the expiry for cache bookkeeping; signature
/// verification is the backend's job.
fn parse_jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jwt(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn parse_jwt_expiry_reads_exp_claim() {
        let token = fake_jwt(1_900_000_000);
        let expiry = parse_jwt_expiry(&token).unwrap();
        assert_eq!(expiry.timestamp(), 1_900_000_000);
    }

    #[test]
    fn parse_jwt_expiry_rejects_garbage() {
        assert!(parse_jwt_expiry("not-a-jwt").is_none());
        assert!(parse_jwt_expiry("a.!!!not-base64!!!.c").is_none());

        let no_exp = format!("h.{}.s", URL_SAFE_NO_PAD.encode(br#"{"sub":"bot"}"#));
        assert!(parse_jwt_expiry(&no_exp).is_none());
    }

    #[test]
    fn cached_token_expires_within_buffer() {
        let fresh = CachedToken {
            token: "t".to_string(),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        };
        assert!(fresh.is_valid());

        // Inside the 5-minute refresh buffer counts as expired.
        let expiring = CachedToken {
            token: "t".to_string(),
            expires_at: Some(Utc::now() + chrono::Duration::seconds(60)),
        };
        assert!(!expiring.is_valid());

        let unparsed = CachedToken {
            token: "t".to_string(),
            expires_at: None,
        };
        assert!(!unparsed.is_valid());
    }
}
