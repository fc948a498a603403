//! Encrypted envelope models: collections, items, revisions, invitations.
//!
//! Everything in this module is ciphertext-by-construction; the structs here
//! are exactly what travels over the wire and what `cache_save` persists.
//! Plaintext only ever exists transiently inside accessor methods.

pub mod collection;
pub mod invitation;
pub mod item;
pub mod revision;

pub use collection::EncryptedCollection;
pub use invitation::SignedInvitation;
pub use item::EncryptedItem;
pub use revision::{ChunkRef, EncryptedRevision};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// Associated-data domain tags. Each envelope kind gets its own tag so a
// ciphertext can never be replayed in a different slot, even under the same
// key.
pub(crate) const COLLECTION_KEY_AD: &[u8] = b"Col";
pub(crate) const COLLECTION_TYPE_AD: &[u8] = b"ColType";
pub(crate) const ITEM_KEY_AD: &[u8] = b"ColItemKey";
pub(crate) const META_AD: &[u8] = b"ColItemMeta";
pub(crate) const CHUNK_AD: &[u8] = b"Chunk";

/// Access level of a collection member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
    Admin,
}

/// A membership removed since the stoken a list request was scoped to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedMembership {
    pub username: String,
}

/// Convenience metadata schema for collections and items.
///
/// The envelope layer treats meta as opaque bytes; this struct is the
/// conventional msgpack encoding apps can use instead of hand-rolling one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Modification time as milliseconds since the epoch, app-defined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ItemMetadata {
    /// Encode to the msgpack meta blob.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from a msgpack meta blob.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// Associated data scoped to a single entity: `tag || ':' || uid`. Binds an
/// envelope to the entity that owns it, not just to its domain.
pub(crate) fn scoped_ad(tag: &[u8], uid: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(tag.len() + 1 + uid.len());
    aad.extend_from_slice(tag);
    aad.push(b':');
    aad.extend_from_slice(uid.as_bytes());
    aad
}

/// Fail fast on entities from a future scheme version.
pub(crate) fn check_version(version: u8) -> Result<()> {
    if version != crate::CURRENT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    Ok(())
}
