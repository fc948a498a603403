//! Signed collection invitations.
//!
//! The collection key and plaintext type travel inside a sealed box
//! addressed to the recipient's identity key and signed by the sender's.
//! The server relays the envelope but can read none of it.

use crate::crypto::managers::IdentityCryptoManager;
use crate::crypto::primitives::pretty_fingerprint;
use crate::crypto::zero::SecretKey;
use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use crate::models::AccessLevel;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The plaintext sealed inside `signed_encryption_key`.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InvitationPayload {
    pub collection_type: String,
    #[serde(with = "serde_bytes")]
    pub collection_key: Vec<u8>,
}

/// A pending invitation, as relayed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInvitation {
    pub uid: String,
    pub version: u8,
    /// Recipient username.
    pub username: String,
    /// Uid of the invited-to collection.
    pub collection: String,
    pub access_level: AccessLevel,
    /// `signature(64) || sealed box` — the collection key and type, sealed
    /// to the recipient and signed by the sender's identity key.
    #[serde(with = "serde_bytes")]
    pub signed_encryption_key: Vec<u8>,
    /// Filled in by the server on incoming invitations.
    pub from_username: Option<String>,
    /// The sender's Ed25519 identity verifying key. Trust in this key is
    /// established out of band; see [`SignedInvitation::sender_fingerprint`].
    #[serde(with = "serde_bytes")]
    pub from_pubkey: Vec<u8>,
    /// The recipient's X25519 identity public key the box was sealed to.
    #[serde(with = "serde_bytes")]
    pub to_pubkey: Vec<u8>,
    /// The sender's opaque type tag, used server-side to scope pending
    /// invitations; meaningless to the recipient.
    #[serde(with = "serde_bytes", default)]
    pub collection_type: Option<Vec<u8>>,
}

impl SignedInvitation {
    /// Verify the sender's signature and unseal the invitation, returning
    /// the plaintext collection type and the granted collection key.
    ///
    /// Fails with an integrity error when the signature does not match
    /// `from_pubkey` or the box was not sealed to this identity.
    pub(crate) fn decrypt_payload(
        &self,
        identity_crypto_manager: &IdentityCryptoManager,
    ) -> Result<(String, SecretKey)> {
        let from_pubkey: [u8; KEY_SIZE] = self
            .from_pubkey
            .as_slice()
            .try_into()
            .map_err(|_| Error::Integrity("invitation sender key has wrong length".into()))?;

        let mut raw =
            identity_crypto_manager.box_open_signed(&from_pubkey, &self.signed_encryption_key)?;
        let decoded: std::result::Result<InvitationPayload, _> = rmp_serde::from_slice(&raw);
        raw.zeroize();

        let payload = decoded?;
        let key = SecretKey::from_slice(&payload.collection_key)?;
        Ok((payload.collection_type.clone(), key))
    }

    /// Human-comparable fingerprint of the sender's identity key, for
    /// out-of-band verification before accepting.
    pub fn sender_fingerprint(&self) -> String {
        pretty_fingerprint(&self.from_pubkey)
    }
}
