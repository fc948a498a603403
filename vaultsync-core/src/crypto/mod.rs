//! Cryptographic layer.
//!
//! This module provides:
//! - Argon2id key derivation (main key from password + salt)
//! - ChaCha20-Poly1305-IETF authenticated encryption
//! - Keyed BLAKE2b MACs and subkey derivation
//! - Signed sealed boxes (X25519 + Ed25519) for invitations
//! - The layered crypto-manager hierarchy
//! - Content-defined chunking of item content
//! - Zeroization utilities

pub mod chunker;
pub mod managers;
pub mod primitives;
pub mod zero;

pub use managers::{
    AccountCryptoManager, CollectionCryptoManager, IdentityCryptoManager, ItemCryptoManager,
    LoginCryptoManager, MainCryptoManager,
};
pub use primitives::{
    derive_key, from_base64, pretty_fingerprint, random_key, random_salt, random_uid, to_base64,
};
pub use zero::SecretKey;

use thiserror::Error;

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305-IETF nonce
pub const NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a keyed BLAKE2b MAC output
pub const MAC_SIZE: usize = 32;

/// Size of the Argon2id salt
pub const SALT_SIZE: usize = 16;

/// Length of an entity uid (base62 characters)
pub const UID_LENGTH: usize = 24;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KdfFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("signature verification failed")]
    BadSignature,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
