//! Encrypted collections.
//!
//! A collection is a sentinel item (holding the collection's own meta and
//! content) plus a symmetric collection key sealed for each authorized
//! member, a deterministically encrypted type tag for server-side scoping,
//! and server bookkeeping (access level, stoken).

use crate::crypto::managers::{
    AccountCryptoManager, CollectionCryptoManager, IdentityCryptoManager,
};
use crate::crypto::primitives::{random_key, random_uid};
use crate::crypto::zero::SecretKey;
use crate::error::{Error, Result};
use crate::models::invitation::{InvitationPayload, SignedInvitation};
use crate::models::item::EncryptedItem;
use crate::models::{
    check_version, AccessLevel, RemovedMembership, COLLECTION_KEY_AD, COLLECTION_TYPE_AD,
};
use crate::crypto::KEY_SIZE;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A collection as stored and transported: all payload sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedCollection {
    /// The collection's own sentinel item; its uid and etag are the
    /// collection's uid and etag.
    pub item: EncryptedItem,
    pub access_level: AccessLevel,
    /// The 32-byte collection key, AEAD-sealed under the holder's account
    /// key (or granted through an accepted invitation and re-sealed).
    #[serde(with = "serde_bytes")]
    pub collection_key: Vec<u8>,
    /// Deterministically encrypted type tag; the server scopes list queries
    /// by ciphertext equality without learning the type.
    #[serde(with = "serde_bytes", default)]
    pub collection_type: Option<Vec<u8>>,
    /// Sync token for this collection's logical timeline.
    pub stoken: Option<String>,
    /// Memberships removed since the stoken of the request, when the server
    /// chose to report them.
    pub removed_memberships: Option<Vec<RemovedMembership>>,
}

impl EncryptedCollection {
    /// Create a new local collection with a fresh collection key.
    pub(crate) fn create(
        account_crypto_manager: &AccountCryptoManager,
        collection_type: &str,
        meta: &[u8],
        content: &[u8],
    ) -> Result<Self> {
        let collection_key = random_key();
        let sealed_key = account_crypto_manager
            .manager
            .encrypt(collection_key.as_bytes(), COLLECTION_KEY_AD)?;
        let type_tag = account_crypto_manager
            .manager
            .encrypt_deterministic(collection_type.as_bytes(), COLLECTION_TYPE_AD)?;

        let crypto_manager =
            CollectionCryptoManager::new(collection_key, crate::CURRENT_VERSION)?;
        let item = EncryptedItem::create(&crypto_manager, meta, content)?;

        Ok(Self {
            item,
            access_level: AccessLevel::Admin,
            collection_key: sealed_key,
            collection_type: Some(type_tag),
            stoken: None,
            removed_memberships: None,
        })
    }

    /// Unseal the collection key and build this collection's crypto
    /// manager. Fails with an integrity error if the sealed key cannot be
    /// opened by this account.
    pub(crate) fn crypto_manager(
        &self,
        account_crypto_manager: &AccountCryptoManager,
    ) -> Result<CollectionCryptoManager> {
        check_version(self.item.version)?;
        let raw = account_crypto_manager
            .manager
            .decrypt(&self.collection_key, COLLECTION_KEY_AD)?;
        let key = SecretKey::from_slice(&raw)?;
        Ok(CollectionCryptoManager::new(key, self.item.version)?)
    }

    /// Decrypt the collection's type tag.
    pub(crate) fn decrypted_collection_type(
        &self,
        account_crypto_manager: &AccountCryptoManager,
    ) -> Result<String> {
        let tag = self.collection_type.as_ref().ok_or_else(|| {
            Error::Programming("collection has no type tag; fetch it first".to_string())
        })?;
        let raw = account_crypto_manager
            .manager
            .decrypt(tag, COLLECTION_TYPE_AD)?;
        String::from_utf8(raw).map_err(|_| Error::Encoding("collection type is not UTF-8".into()))
    }

    /// Issue a signed invitation granting `access_level` on this collection
    /// to the holder of `recipient_pub`.
    pub(crate) fn create_invitation(
        &self,
        account_crypto_manager: &AccountCryptoManager,
        identity_crypto_manager: &IdentityCryptoManager,
        username: &str,
        recipient_pub: &[u8; KEY_SIZE],
        access_level: AccessLevel,
    ) -> Result<SignedInvitation> {
        let collection_key = account_crypto_manager
            .manager
            .decrypt(&self.collection_key, COLLECTION_KEY_AD)?;
        let payload = InvitationPayload {
            collection_type: self.decrypted_collection_type(account_crypto_manager)?,
            collection_key,
        };

        let mut encoded = rmp_serde::to_vec_named(&payload)?;
        let signed_encryption_key =
            identity_crypto_manager.box_seal_signed(recipient_pub, &encoded);
        encoded.zeroize();
        let signed_encryption_key = signed_encryption_key?;

        Ok(SignedInvitation {
            uid: random_uid(),
            version: crate::CURRENT_VERSION,
            username: username.to_string(),
            collection: self.uid().to_string(),
            access_level,
            signed_encryption_key,
            from_username: None,
            from_pubkey: identity_crypto_manager.verify_key().to_vec(),
            to_pubkey: recipient_pub.to_vec(),
            collection_type: self.collection_type.clone(),
        })
    }

    pub fn uid(&self) -> &str {
        &self.item.uid
    }

    pub fn etag(&self) -> String {
        self.item.etag()
    }

    pub fn needs_upload(&self) -> bool {
        self.item.needs_upload()
    }

    pub fn is_deleted(&self) -> bool {
        self.item.is_deleted()
    }

    pub(crate) fn verify(
        &self,
        collection_crypto_manager: &CollectionCryptoManager,
    ) -> Result<()> {
        let item_crypto_manager = self.item.crypto_manager(collection_crypto_manager)?;
        self.item.verify(&item_crypto_manager)
    }

    pub(crate) fn mark_saved(&mut self) {
        self.item.mark_saved();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::random_key;

    fn account_manager() -> AccountCryptoManager {
        AccountCryptoManager::new(random_key(), 1).unwrap()
    }

    #[test]
    fn create_then_unseal_key_and_read_payload() {
        let account = account_manager();
        let collection =
            EncryptedCollection::create(&account, "notes", b"{\"name\":\"Notes\"}", b"hello")
                .unwrap();

        assert_eq!(collection.access_level, AccessLevel::Admin);
        assert!(collection.needs_upload());
        assert!(collection.stoken.is_none());

        let cm = collection.crypto_manager(&account).unwrap();
        collection.verify(&cm).unwrap();

        let item_cm = collection.item.crypto_manager(&cm).unwrap();
        assert_eq!(
            collection.item.decrypted_content(&item_cm).unwrap(),
            b"hello"
        );
        assert_eq!(
            collection.decrypted_collection_type(&account).unwrap(),
            "notes"
        );
    }

    #[test]
    fn foreign_account_cannot_unseal_the_key() {
        let account = account_manager();
        let collection = EncryptedCollection::create(&account, "notes", b"meta", b"x").unwrap();

        let other = account_manager();
        assert!(matches!(
            collection.crypto_manager(&other),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn equal_types_share_a_ciphertext_for_scoping() {
        let account = account_manager();
        let a = EncryptedCollection::create(&account, "notes", b"m1", b"c1").unwrap();
        let b = EncryptedCollection::create(&account, "notes", b"m2", b"c2").unwrap();
        let c = EncryptedCollection::create(&account, "calendar", b"m3", b"c3").unwrap();

        assert_eq!(a.collection_type, b.collection_type);
        assert_ne!(a.collection_type, c.collection_type);
    }

    #[test]
    fn invitation_grants_the_real_collection_key() {
        let account = account_manager();
        let sender = IdentityCryptoManager::from_seed(&random_key()).unwrap();
        let receiver = IdentityCryptoManager::from_seed(&random_key()).unwrap();

        let collection = EncryptedCollection::create(&account, "notes", b"meta", b"body").unwrap();
        let invitation = collection
            .create_invitation(
                &account,
                &sender,
                "bob",
                &receiver.pubkey(),
                AccessLevel::ReadWrite,
            )
            .unwrap();

        assert_eq!(invitation.collection, collection.uid());
        assert_eq!(invitation.access_level, AccessLevel::ReadWrite);

        let (collection_type, key) = invitation.decrypt_payload(&receiver).unwrap();
        assert_eq!(collection_type, "notes");

        // The granted key opens the collection's envelopes.
        let cm = CollectionCryptoManager::new(key, collection.item.version).unwrap();
        collection.verify(&cm).unwrap();
    }

    #[test]
    fn wire_roundtrip() {
        let account = account_manager();
        let collection = EncryptedCollection::create(&account, "notes", b"meta", b"body").unwrap();

        let bytes = rmp_serde::to_vec_named(&collection).unwrap();
        let decoded: EncryptedCollection = rmp_serde::from_slice(&bytes).unwrap();

        assert_eq!(decoded.uid(), collection.uid());
        let cm = decoded.crypto_manager(&account).unwrap();
        decoded.verify(&cm).unwrap();
    }
}
