//! Backend client error types.

use thiserror::Error;

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the game backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned an error response.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Login succeeded but the response carried no usable token.
    #[error("login response missing token")]
    MissingToken,
}
