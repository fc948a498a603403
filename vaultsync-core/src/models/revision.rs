//! Encrypted revisions: one immutable snapshot of an item's meta + content.
//!
//! A revision's `uid` is the keyed MAC of its canonical serialization and
//! doubles as the item's etag. Content is split into content-defined chunks,
//! each sealed deterministically so unchanged chunks keep their uid (and
//! ciphertext) across revisions.

use crate::crypto::chunker;
use crate::crypto::managers::ItemCryptoManager;
use crate::crypto::primitives::{ct_eq, from_base64, to_base64};
use crate::error::{Error, Result};
use crate::models::{scoped_ad, CHUNK_AD, META_AD};
use serde::{Deserialize, Serialize};

/// One sealed content chunk: `uid` is the keyed MAC of the ciphertext,
/// `content` is the ciphertext itself — absent when the chunk lives on the
/// server (placeholder from a prefetch-less fetch, or already uploaded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRef {
    pub uid: String,
    #[serde(with = "serde_bytes", default)]
    pub content: Option<Vec<u8>>,
}

/// An immutable, authenticated snapshot of an item's meta and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedRevision {
    pub uid: String,
    #[serde(with = "serde_bytes")]
    pub meta: Vec<u8>,
    pub deleted: bool,
    pub chunks: Vec<ChunkRef>,
}

impl EncryptedRevision {
    /// Seal fresh meta and content into a new revision.
    pub(crate) fn create(
        crypto_manager: &ItemCryptoManager,
        item_uid: &str,
        meta: &[u8],
        content: &[u8],
        deleted: bool,
    ) -> Result<Self> {
        let sealed_meta = Self::seal_meta(crypto_manager, item_uid, meta)?;
        let chunks = Self::seal_chunks(crypto_manager, item_uid, content)?;
        Self::assemble(crypto_manager, sealed_meta, chunks, deleted)
    }

    /// Build a revision from already-sealed parts and compute its uid.
    pub(crate) fn assemble(
        crypto_manager: &ItemCryptoManager,
        meta: Vec<u8>,
        chunks: Vec<ChunkRef>,
        deleted: bool,
    ) -> Result<Self> {
        let mut revision = Self {
            uid: String::new(),
            meta,
            deleted,
            chunks,
        };
        revision.uid = revision.calculate_uid(crypto_manager)?;
        Ok(revision)
    }

    pub(crate) fn seal_meta(
        crypto_manager: &ItemCryptoManager,
        item_uid: &str,
        meta: &[u8],
    ) -> Result<Vec<u8>> {
        Ok(crypto_manager.manager.encrypt(meta, &scoped_ad(META_AD, item_uid))?)
    }

    /// Chunk and seal content. Deterministic end to end: identical content
    /// always yields identical chunk uids under the same item key.
    pub(crate) fn seal_chunks(
        crypto_manager: &ItemCryptoManager,
        item_uid: &str,
        content: &[u8],
    ) -> Result<Vec<ChunkRef>> {
        let aad = scoped_ad(CHUNK_AD, item_uid);
        chunker::split(content)
            .into_iter()
            .map(|plain| {
                let ciphertext = crypto_manager.manager.encrypt_deterministic(plain, &aad)?;
                let uid = to_base64(&crypto_manager.manager.mac(&ciphertext)?);
                Ok(ChunkRef {
                    uid,
                    content: Some(ciphertext),
                })
            })
            .collect()
    }

    /// Recompute the uid and re-open the meta envelope; any mismatch is an
    /// integrity failure.
    pub(crate) fn verify(&self, crypto_manager: &ItemCryptoManager, item_uid: &str) -> Result<()> {
        let expected = self.calculate_uid(crypto_manager)?;
        if !ct_eq(expected.as_bytes(), self.uid.as_bytes()) {
            return Err(Error::Integrity(format!(
                "revision uid mismatch for item {}",
                item_uid
            )));
        }
        self.decrypt_meta(crypto_manager, item_uid)?;
        Ok(())
    }

    pub(crate) fn decrypt_meta(
        &self,
        crypto_manager: &ItemCryptoManager,
        item_uid: &str,
    ) -> Result<Vec<u8>> {
        Ok(crypto_manager
            .manager
            .decrypt(&self.meta, &scoped_ad(META_AD, item_uid))?)
    }

    /// Reconstruct the full content by decrypting chunks in order.
    ///
    /// Every chunk's MAC is recomputed against its uid before use; a single
    /// tampered chunk fails the whole read without exposing partial
    /// plaintext.
    pub(crate) fn decrypt_content(
        &self,
        crypto_manager: &ItemCryptoManager,
        item_uid: &str,
    ) -> Result<Vec<u8>> {
        let aad = scoped_ad(CHUNK_AD, item_uid);
        let mut content = Vec::new();
        for chunk in &self.chunks {
            let ciphertext = chunk.content.as_ref().ok_or_else(|| {
                Error::Programming(format!(
                    "chunk {} of item {} has no content; download it first",
                    chunk.uid, item_uid
                ))
            })?;

            let mac = crypto_manager.manager.mac(ciphertext)?;
            let expected = from_base64(&chunk.uid)?;
            if !ct_eq(&mac, &expected) {
                return Err(Error::Integrity(format!(
                    "chunk {} of item {} failed MAC verification",
                    chunk.uid, item_uid
                )));
            }

            content.extend_from_slice(&crypto_manager.manager.decrypt(ciphertext, &aad)?);
        }
        Ok(content)
    }

    /// Drop ciphertext for chunks the server already has, so batch uploads
    /// only carry chunks that are genuinely new.
    pub(crate) fn reuse_uploaded_chunks(&mut self, previous: &EncryptedRevision) {
        for chunk in &mut self.chunks {
            let already_uploaded = previous
                .chunks
                .iter()
                .any(|prior| prior.uid == chunk.uid && prior.content.is_none());
            if already_uploaded {
                chunk.content = None;
            }
        }
    }

    /// Whether every chunk's ciphertext is locally present.
    pub(crate) fn has_full_content(&self) -> bool {
        self.chunks.iter().all(|c| c.content.is_some())
    }

    fn calculate_uid(&self, crypto_manager: &ItemCryptoManager) -> Result<String> {
        Ok(to_base64(
            &crypto_manager.manager.mac(&self.canonical_bytes())?,
        ))
    }

    /// Canonical byte sequence covered by the revision MAC: the deleted
    /// flag, the sealed meta, and every chunk uid in order, each part
    /// length-prefixed to rule out boundary ambiguity.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        push_part(&mut buf, &[self.deleted as u8]);
        push_part(&mut buf, &self.meta);
        for chunk in &self.chunks {
            push_part(&mut buf, chunk.uid.as_bytes());
        }
        buf
    }
}

fn push_part(buf: &mut Vec<u8>, part: &[u8]) {
    buf.extend_from_slice(&(part.len() as u64).to_le_bytes());
    buf.extend_from_slice(part);
}
