//! Crate-level error type.
//!
//! Every public operation returns [`Result`]. Variants map one-to-one onto
//! the protocol's error kinds; the HTTP status translation itself lives in
//! `sync::client`.

use crate::crypto::CryptoError;
use thiserror::Error;

/// Result type for all VaultSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the client core
#[derive(Error, Debug)]
pub enum Error {
    /// MAC, signature, or decryption failure. Never retry.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Optimistic-concurrency rejection; refetch and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Token missing or expired; `fetch_token` and retry.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Transport failure (DNS, connection, timeout). Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// 502/503/504. Retryable with backoff.
    #[error("temporary server error ({status}): {detail}")]
    TemporaryServer { status: u16, detail: String },

    /// Other 5xx. Not retryable without intervention.
    #[error("server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    /// Any other unexpected HTTP status.
    #[error("http error ({status}): {detail}")]
    Http { status: u16, detail: String },

    /// Contract violation on the caller's side. A bug, not a condition.
    #[error("programming error: {0}")]
    Programming(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Serialization failure (msgpack, JSON, base64).
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Crypto failures that are not integrity violations (KDF, RNG, sealing).
    #[error(transparent)]
    Crypto(CryptoError),
}

impl Error {
    /// Whether the operation may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::TemporaryServer { .. })
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed
            | CryptoError::BadSignature
            | CryptoError::MalformedEnvelope(_) => Error::Integrity(err.to_string()),
            other => Error::Crypto(other),
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Programming(format!("invalid URL: {}", err))
    }
}
