//! Zeroization utilities for secure memory handling.

use crate::crypto::{CryptoError, Result, KEY_SIZE};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A 256-bit secret key that is zeroized when dropped.
///
/// All key material in the manager hierarchy is held in this type so that
/// intermediate keys never outlive their scope in readable memory.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from a slice, failing on any length other than 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] =
            slice
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    got: slice.len(),
                })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Zeroize a byte buffer in place.
pub fn zeroize_bytes(data: &mut [u8]) {
    data.zeroize();
}
