//! Error types for the preview proxy.

use thiserror::Error;

/// Cookie codec failures. All of these count as an invalid credential, not
/// a server error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Value does not have the payload.tag shape
    #[error("malformed cookie value")]
    Malformed,

    /// Payload is not valid base64 or UTF-8
    #[error("invalid cookie payload encoding")]
    Payload,

    /// MAC verification failed
    #[error("cookie signature mismatch")]
    BadSignature,
}

/// Upstream API failures during credential validation or token exchange.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request could not be sent or the response not read
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}
