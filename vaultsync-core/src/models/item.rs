//! Encrypted items and their sync state.
//!
//! An item's current revision uid is its etag; `last_etag` remembers the
//! last server-acknowledged etag. The gap between the two is the entire
//! local sync state:
//!
//! - New:     `last_etag == None`
//! - Clean:   `last_etag == Some(etag())`
//! - Dirty:   `last_etag == Some(x)` with `x != etag()`
//! - Deleted: Dirty with the revision's `deleted` flag set

use crate::crypto::managers::{CollectionCryptoManager, ItemCryptoManager};
use crate::crypto::primitives::random_uid;
use crate::crypto::zero::SecretKey;
use crate::error::Result;
use crate::models::revision::EncryptedRevision;
use crate::models::{check_version, scoped_ad, ITEM_KEY_AD};
use serde::{Deserialize, Serialize};

/// A collection item as stored and transported: all payload sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedItem {
    pub uid: String,
    pub version: u8,
    /// The item's own symmetric key, sealed under the collection key. When
    /// absent the collection key is used directly.
    #[serde(with = "serde_bytes", default)]
    pub encryption_key: Option<Vec<u8>>,
    /// The current revision.
    pub content: EncryptedRevision,
    /// Etag acknowledged by the server at the last save; serialized as
    /// `etag` on the wire, where it doubles as the optimistic-concurrency
    /// gate on upload.
    #[serde(rename = "etag")]
    pub(crate) last_etag: Option<String>,
}

impl EncryptedItem {
    /// Create a new local item holding `meta` and `content`.
    pub(crate) fn create(
        collection_crypto_manager: &CollectionCryptoManager,
        meta: &[u8],
        content: &[u8],
    ) -> Result<Self> {
        let uid = random_uid();
        let crypto_manager = collection_crypto_manager.item_crypto_manager(None)?;
        let revision = EncryptedRevision::create(&crypto_manager, &uid, meta, content, false)?;
        Ok(Self {
            uid,
            version: crate::CURRENT_VERSION,
            encryption_key: None,
            content: revision,
            last_etag: None,
        })
    }

    /// Derive this item's crypto manager, unsealing the per-item key when
    /// one is present.
    pub(crate) fn crypto_manager(
        &self,
        collection_crypto_manager: &CollectionCryptoManager,
    ) -> Result<ItemCryptoManager> {
        check_version(self.version)?;
        let key = match &self.encryption_key {
            Some(sealed) => {
                let raw = collection_crypto_manager
                    .manager
                    .decrypt(sealed, &scoped_ad(ITEM_KEY_AD, &self.uid))?;
                Some(SecretKey::from_slice(&raw)?)
            }
            None => None,
        };
        Ok(collection_crypto_manager.item_crypto_manager(key)?)
    }

    /// The current revision uid.
    pub fn etag(&self) -> String {
        self.content.uid.clone()
    }

    /// Whether local edits have not yet been acknowledged by the server.
    pub fn needs_upload(&self) -> bool {
        self.last_etag.as_deref() != Some(self.content.uid.as_str())
    }

    pub fn is_deleted(&self) -> bool {
        self.content.deleted
    }

    /// Whether any chunk is a placeholder that must be downloaded before
    /// the content can be read.
    pub fn is_missing_content(&self) -> bool {
        !self.content.has_full_content()
    }

    pub(crate) fn meta(&self, crypto_manager: &ItemCryptoManager) -> Result<Vec<u8>> {
        self.content.decrypt_meta(crypto_manager, &self.uid)
    }

    pub(crate) fn decrypted_content(&self, crypto_manager: &ItemCryptoManager) -> Result<Vec<u8>> {
        self.content.decrypt_content(crypto_manager, &self.uid)
    }

    /// Replace the current revision with one carrying new meta and the
    /// existing chunks.
    pub(crate) fn set_meta(
        &mut self,
        crypto_manager: &ItemCryptoManager,
        meta: &[u8],
    ) -> Result<()> {
        let sealed = EncryptedRevision::seal_meta(crypto_manager, &self.uid, meta)?;
        self.content = EncryptedRevision::assemble(
            crypto_manager,
            sealed,
            self.content.chunks.clone(),
            self.content.deleted,
        )?;
        Ok(())
    }

    /// Replace the current revision with one carrying new content and the
    /// existing sealed meta. Chunks unchanged since the last upload are
    /// kept as server references and not re-sent.
    pub(crate) fn set_content(
        &mut self,
        crypto_manager: &ItemCryptoManager,
        content: &[u8],
    ) -> Result<()> {
        let chunks = EncryptedRevision::seal_chunks(crypto_manager, &self.uid, content)?;
        let mut revision = EncryptedRevision::assemble(
            crypto_manager,
            self.content.meta.clone(),
            chunks,
            self.content.deleted,
        )?;
        revision.reuse_uploaded_chunks(&self.content);
        self.content = revision;
        Ok(())
    }

    /// Mark the item deleted. The tombstone is itself a revision and syncs
    /// like any other edit.
    pub(crate) fn delete(&mut self, crypto_manager: &ItemCryptoManager) -> Result<()> {
        self.content = EncryptedRevision::assemble(
            crypto_manager,
            self.content.meta.clone(),
            self.content.chunks.clone(),
            true,
        )?;
        Ok(())
    }

    pub(crate) fn verify(&self, crypto_manager: &ItemCryptoManager) -> Result<()> {
        self.content.verify(crypto_manager, &self.uid)
    }

    /// Record the server's acknowledgement of the current revision.
    pub(crate) fn mark_saved(&mut self) {
        self.last_etag = Some(self.content.uid.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::random_key;
    use crate::models::scoped_ad;

    fn collection_manager() -> CollectionCryptoManager {
        CollectionCryptoManager::new(random_key(), 1).unwrap()
    }

    #[test]
    fn new_item_is_unsaved_until_acked() {
        let col_cm = collection_manager();
        let mut item = EncryptedItem::create(&col_cm, b"meta", b"content").unwrap();

        assert!(item.last_etag.is_none());
        assert!(item.needs_upload());

        item.mark_saved();
        assert!(!item.needs_upload());
        assert_eq!(item.last_etag.as_deref(), Some(item.etag().as_str()));
    }

    #[test]
    fn editing_makes_item_dirty_again() {
        let col_cm = collection_manager();
        let mut item = EncryptedItem::create(&col_cm, b"meta", b"content").unwrap();
        let cm = item.crypto_manager(&col_cm).unwrap();
        item.mark_saved();

        let old_etag = item.etag();
        item.set_content(&cm, b"new content").unwrap();

        assert_ne!(item.etag(), old_etag);
        assert!(item.needs_upload());
        assert_eq!(item.decrypted_content(&cm).unwrap(), b"new content");
        // Meta survives a content edit untouched.
        assert_eq!(item.meta(&cm).unwrap(), b"meta");
    }

    #[test]
    fn set_meta_keeps_content() {
        let col_cm = collection_manager();
        let mut item = EncryptedItem::create(&col_cm, b"old meta", b"content").unwrap();
        let cm = item.crypto_manager(&col_cm).unwrap();

        item.set_meta(&cm, b"new meta").unwrap();
        assert_eq!(item.meta(&cm).unwrap(), b"new meta");
        assert_eq!(item.decrypted_content(&cm).unwrap(), b"content");
    }

    #[test]
    fn delete_is_a_dirty_tombstone() {
        let col_cm = collection_manager();
        let mut item = EncryptedItem::create(&col_cm, b"meta", b"content").unwrap();
        let cm = item.crypto_manager(&col_cm).unwrap();
        item.mark_saved();

        item.delete(&cm).unwrap();
        assert!(item.is_deleted());
        assert!(item.needs_upload());
        item.verify(&cm).unwrap();
    }

    #[test]
    fn item_with_own_sealed_key_roundtrips() {
        let col_cm = collection_manager();
        let item_key = random_key();

        let uid = random_uid();
        let sealed_key = col_cm
            .manager
            .encrypt(item_key.as_bytes(), &scoped_ad(ITEM_KEY_AD, &uid))
            .unwrap();
        let keyed_cm = col_cm.item_crypto_manager(Some(item_key)).unwrap();
        let revision = EncryptedRevision::create(&keyed_cm, &uid, b"meta", b"data", false).unwrap();

        let item = EncryptedItem {
            uid,
            version: crate::CURRENT_VERSION,
            encryption_key: Some(sealed_key),
            content: revision,
            last_etag: None,
        };

        let cm = item.crypto_manager(&col_cm).unwrap();
        assert_eq!(item.decrypted_content(&cm).unwrap(), b"data");
        item.verify(&cm).unwrap();
    }

    #[test]
    fn unknown_version_is_refused_before_decryption() {
        let col_cm = collection_manager();
        let mut item = EncryptedItem::create(&col_cm, b"meta", b"content").unwrap();
        item.version = 9;

        assert!(matches!(
            item.crypto_manager(&col_cm),
            Err(crate::Error::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn wire_roundtrip_preserves_state() {
        let col_cm = collection_manager();
        let mut item = EncryptedItem::create(&col_cm, b"meta", b"content").unwrap();
        item.mark_saved();

        let bytes = rmp_serde::to_vec_named(&item).unwrap();
        let decoded: EncryptedItem = rmp_serde::from_slice(&bytes).unwrap();

        assert_eq!(decoded.uid, item.uid);
        assert_eq!(decoded.last_etag, item.last_etag);
        let cm = decoded.crypto_manager(&col_cm).unwrap();
        decoded.verify(&cm).unwrap();
    }
}
