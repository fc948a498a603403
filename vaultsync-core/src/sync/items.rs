//! Item handles and the item sync state machine.
//!
//! Uploads come in two flavors with the same atomicity guarantee:
//!
//! - `batch`: all-or-nothing across the call, gated on each item's (and
//!   each dep's) stored etag. Safe to repeat after a Conflict once the
//!   caller refreshes its etags.
//! - `transaction`: batch plus a gate on the collection's stoken, for
//!   callers that need linearizable ordering against concurrent writers.
//!
//! Chunks travel separately: new chunk ciphertexts are PUT before the batch
//! call, and the server deduplicates by chunk uid.

use crate::crypto::managers::{CollectionCryptoManager, ItemCryptoManager};
use crate::crypto::primitives::{ct_eq, from_base64};
use crate::error::{Error, Result};
use crate::models::{EncryptedItem, EncryptedRevision};
use crate::sync::client::{msgpack_decode, msgpack_encode, Client};
use crate::sync::models::{IteratorListResponse, ItemBatchBody, ItemDep, ListResponse};
use crate::sync::options::FetchOptions;
use std::sync::Arc;
use tracing::debug;

/// A decryptable handle around an [`EncryptedItem`].
pub struct Item {
    pub(crate) item: EncryptedItem,
    crypto_manager: Arc<ItemCryptoManager>,
}

impl Item {
    pub(crate) fn new(item: EncryptedItem, crypto_manager: Arc<ItemCryptoManager>) -> Self {
        Self {
            item,
            crypto_manager,
        }
    }

    pub fn uid(&self) -> &str {
        &self.item.uid
    }

    /// The current revision uid; changes on every edit.
    pub fn etag(&self) -> String {
        self.item.etag()
    }

    pub fn needs_upload(&self) -> bool {
        self.item.needs_upload()
    }

    pub fn is_deleted(&self) -> bool {
        self.item.is_deleted()
    }

    /// Whether chunk ciphertexts still have to be downloaded before the
    /// content can be read.
    pub fn is_missing_content(&self) -> bool {
        self.item.is_missing_content()
    }

    pub fn meta(&self) -> Result<Vec<u8>> {
        self.item.meta(&self.crypto_manager)
    }

    pub fn set_meta(&mut self, meta: &[u8]) -> Result<()> {
        self.item.set_meta(&self.crypto_manager, meta)
    }

    pub fn content_bytes(&self) -> Result<Vec<u8>> {
        self.item.decrypted_content(&self.crypto_manager)
    }

    pub fn content_string(&self) -> Result<String> {
        String::from_utf8(self.content_bytes()?)
            .map_err(|_| Error::Encoding("item content is not UTF-8".into()))
    }

    pub fn set_content(&mut self, content: &[u8]) -> Result<()> {
        self.item.set_content(&self.crypto_manager, content)
    }

    /// Mark the item deleted; the tombstone still has to be uploaded.
    pub fn delete(&mut self) -> Result<()> {
        self.item.delete(&self.crypto_manager)
    }

    pub fn verify(&self) -> Result<()> {
        self.item.verify(&self.crypto_manager)
    }
}

/// A stoken-paged list of items.
pub struct ItemListResponse {
    pub items: Vec<Item>,
    pub stoken: Option<String>,
    pub done: bool,
}

/// An iterator-paged list of an item's historical revisions, exposed as
/// pseudo-items whose etag is the revision uid.
pub struct RevisionListResponse {
    pub items: Vec<Item>,
    pub iterator: Option<String>,
    pub done: bool,
}

/// Creates, fetches and uploads the items of one collection.
pub struct ItemManager {
    client: Arc<Client>,
    collection_uid: String,
    collection_crypto_manager: Arc<CollectionCryptoManager>,
}

impl ItemManager {
    pub(crate) fn new(
        client: Arc<Client>,
        collection_uid: String,
        collection_crypto_manager: Arc<CollectionCryptoManager>,
    ) -> Self {
        Self {
            client,
            collection_uid,
            collection_crypto_manager,
        }
    }

    fn base_path(&self) -> String {
        format!("api/v1/collection/{}/item/", self.collection_uid)
    }

    /// Create a new local item; nothing reaches the server until a batch or
    /// transaction includes it.
    pub fn create(&self, meta: &[u8], content: &[u8]) -> Result<Item> {
        let item = EncryptedItem::create(&self.collection_crypto_manager, meta, content)?;
        self.attach(item)
    }

    /// Fetch a single item by uid.
    pub async fn fetch(&self, item_uid: &str, options: Option<&FetchOptions>) -> Result<Item> {
        let query = options.map(|o| o.to_query(true)).unwrap_or_default();
        let response = self
            .client
            .get(&format!("{}{}/", self.base_path(), item_uid), &query)
            .await?;
        let item: EncryptedItem = msgpack_decode(&response)?;
        self.attach(item)
    }

    /// List the collection's items.
    pub async fn list(&self, options: Option<&FetchOptions>) -> Result<ItemListResponse> {
        let query = options.map(|o| o.to_query(true)).unwrap_or_default();
        let response = self.client.get(&self.base_path(), &query).await?;
        self.into_list_response(msgpack_decode(&response)?)
    }

    /// Ask the server which of the given items have advanced remotely.
    ///
    /// Without a stoken the server diffs against each item's stored etag;
    /// with one it diffs the collection's timeline instead and the etags
    /// are omitted.
    pub async fn fetch_updates(
        &self,
        items: &[&Item],
        options: Option<&FetchOptions>,
    ) -> Result<ItemListResponse> {
        let use_stoken = options.map_or(false, |o| o.stoken.is_some());
        let deps: Vec<ItemDep> = items
            .iter()
            .map(|item| ItemDep {
                uid: item.uid().to_string(),
                etag: if use_stoken {
                    None
                } else {
                    item.item.last_etag.clone()
                },
            })
            .collect();

        let query = options.map(|o| o.to_query(true)).unwrap_or_default();
        let response = self
            .client
            .post(
                &format!("{}fetch_updates/", self.base_path()),
                &query,
                msgpack_encode(&deps)?,
            )
            .await?;
        self.into_list_response(msgpack_decode(&response)?)
    }

    /// Atomically apply the items' pending revisions, each gated on its
    /// stored etag (and every dep's). On Conflict nothing was applied.
    pub async fn batch(
        &self,
        items: &mut [&mut Item],
        deps: Option<&[&Item]>,
        options: Option<&FetchOptions>,
    ) -> Result<()> {
        self.push(items, deps, options, None).await
    }

    /// [`batch`](Self::batch) additionally gated on the collection's
    /// stoken, taken from the options. Fails with a Programming error when
    /// the options carry no stoken — without one the write would not be
    /// linearizable and belongs in [`batch`](Self::batch).
    pub async fn transaction(
        &self,
        items: &mut [&mut Item],
        deps: Option<&[&Item]>,
        options: Option<&FetchOptions>,
    ) -> Result<()> {
        let stoken = options.and_then(|o| o.stoken.clone()).ok_or_else(|| {
            Error::Programming(
                "transaction requires a stoken; pass the collection's through the options"
                    .to_string(),
            )
        })?;
        self.push(items, deps, options, Some(stoken)).await
    }

    async fn push(
        &self,
        items: &mut [&mut Item],
        deps: Option<&[&Item]>,
        options: Option<&FetchOptions>,
        stoken: Option<String>,
    ) -> Result<()> {
        // A never-uploaded item referencing server-side chunks is a caller
        // bug: nothing could have uploaded them.
        for item in items.iter() {
            if item.item.last_etag.is_none() && item.item.is_missing_content() {
                return Err(Error::Programming(format!(
                    "item {} references chunks that were never uploaded",
                    item.uid()
                )));
            }
        }

        for item in items.iter_mut() {
            upload_chunks(&self.client, &self.collection_uid, &mut item.item).await?;
        }

        let encoded = {
            let body = ItemBatchBody {
                items: items.iter().map(|item| &item.item).collect(),
                deps: deps.map(|deps| {
                    deps.iter()
                        .map(|dep| ItemDep {
                            uid: dep.uid().to_string(),
                            etag: dep.item.last_etag.clone(),
                        })
                        .collect()
                }),
            };
            msgpack_encode(&body)?
        };

        let mut query = options.map(|o| o.to_query(false)).unwrap_or_default();
        let endpoint = if stoken.is_some() { "transaction/" } else { "batch/" };
        if let Some(stoken) = stoken {
            query.push(("stoken", stoken));
        }
        self.client
            .post(&format!("{}{}", self.base_path(), endpoint), &query, encoded)
            .await?;

        for item in items.iter_mut() {
            item.item.mark_saved();
        }
        debug!(
            count = items.len(),
            collection = %self.collection_uid,
            "items applied"
        );
        Ok(())
    }

    /// Page through an item's historical revisions, newest first.
    pub async fn item_revisions(
        &self,
        item: &Item,
        options: Option<&FetchOptions>,
    ) -> Result<RevisionListResponse> {
        let query = options.map(|o| o.to_query(false)).unwrap_or_default();
        let response = self
            .client
            .get(
                &format!("{}{}/revision/", self.base_path(), item.uid()),
                &query,
            )
            .await?;
        let list: IteratorListResponse<EncryptedRevision> = msgpack_decode(&response)?;

        let items = list
            .data
            .into_iter()
            .map(|revision| {
                let last_etag = Some(revision.uid.clone());
                self.attach(EncryptedItem {
                    uid: item.item.uid.clone(),
                    version: item.item.version,
                    encryption_key: item.item.encryption_key.clone(),
                    content: revision,
                    last_etag,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RevisionListResponse {
            items,
            iterator: list.iterator,
            done: list.done,
        })
    }

    /// Download any chunk ciphertexts the item is missing, verifying each
    /// against its uid.
    pub async fn download_content(&self, item: &mut Item) -> Result<()> {
        let base = self.base_path();
        for chunk in &mut item.item.content.chunks {
            if chunk.content.is_some() {
                continue;
            }
            let bytes = self
                .client
                .get_octet(&format!(
                    "{}{}/chunk/{}/download/",
                    base, item.item.uid, chunk.uid
                ))
                .await?;

            let mac = item.crypto_manager.manager.mac(&bytes)?;
            if !ct_eq(&mac, &from_base64(&chunk.uid)?) {
                return Err(Error::Integrity(format!(
                    "downloaded chunk {} failed MAC verification",
                    chunk.uid
                )));
            }
            chunk.content = Some(bytes);
        }
        Ok(())
    }

    /// Serialize an item's encrypted state for the app's cache.
    pub fn cache_save(&self, item: &Item) -> Result<Vec<u8>> {
        msgpack_encode(&(crate::CURRENT_VERSION, &item.item))
    }

    /// Restore an item from [`cache_save`](Self::cache_save) output.
    pub fn cache_load(&self, data: &[u8]) -> Result<Item> {
        let (version, item): (u8, EncryptedItem) = msgpack_decode(data)?;
        if version != crate::CURRENT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        self.attach(item)
    }

    fn into_list_response(&self, list: ListResponse<EncryptedItem>) -> Result<ItemListResponse> {
        let items = list
            .data
            .into_iter()
            .map(|item| self.attach(item))
            .collect::<Result<Vec<_>>>()?;
        Ok(ItemListResponse {
            items,
            stoken: list.stoken,
            done: list.done,
        })
    }

    /// Attach the item's crypto manager and verify the envelope.
    fn attach(&self, item: EncryptedItem) -> Result<Item> {
        let crypto_manager = Arc::new(item.crypto_manager(&self.collection_crypto_manager)?);
        let item = Item::new(item, crypto_manager);
        item.verify()?;
        Ok(item)
    }
}

/// Upload every chunk the server does not have yet, clearing local
/// ciphertext as the server acknowledges it. A Conflict means the dedup
/// store already holds the chunk and counts as success.
pub(crate) async fn upload_chunks(
    client: &Client,
    collection_uid: &str,
    item: &mut EncryptedItem,
) -> Result<()> {
    for chunk in &mut item.content.chunks {
        let Some(content) = chunk.content.as_ref() else {
            continue;
        };
        let path = format!(
            "api/v1/collection/{}/item/{}/chunk/{}/",
            collection_uid, item.uid, chunk.uid
        );
        match client.put_octet(&path, content.clone()).await {
            Ok(_) | Err(Error::Conflict(_)) => chunk.content = None,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::random_key;

    fn manager() -> ItemManager {
        ItemManager::new(
            Arc::new(Client::new("http://localhost:8000").unwrap()),
            "col-uid".to_string(),
            Arc::new(CollectionCryptoManager::new(random_key(), 1).unwrap()),
        )
    }

    #[test]
    fn created_item_walks_the_state_machine() {
        let manager = manager();
        let mut item = manager.create(b"meta", b"v1").unwrap();

        // New
        assert!(item.needs_upload());

        // Clean
        item.item.mark_saved();
        assert!(!item.needs_upload());

        // Dirty
        item.set_content(b"v2").unwrap();
        assert!(item.needs_upload());
        assert_eq!(item.content_bytes().unwrap(), b"v2");

        // Deleted
        item.item.mark_saved();
        item.delete().unwrap();
        assert!(item.is_deleted());
        assert!(item.needs_upload());
    }

    #[test]
    fn content_string_rejects_non_utf8() {
        let manager = manager();
        let item = manager.create(b"meta", &[0xFF, 0xFE, 0x00]).unwrap();
        assert!(matches!(
            item.content_string(),
            Err(Error::Encoding(_))
        ));

        let item = manager.create(b"meta", "héllo".as_bytes()).unwrap();
        assert_eq!(item.content_string().unwrap(), "héllo");
    }

    #[test]
    fn cache_roundtrip_preserves_state() {
        let manager = manager();
        let mut item = manager.create(b"meta", b"content").unwrap();
        item.item.mark_saved();

        let blob = manager.cache_save(&item).unwrap();
        let restored = manager.cache_load(&blob).unwrap();

        assert_eq!(restored.uid(), item.uid());
        assert_eq!(restored.etag(), item.etag());
        assert!(!restored.needs_upload());
        assert_eq!(restored.content_bytes().unwrap(), b"content");
    }

    #[test]
    fn cache_load_refuses_future_versions() {
        let manager = manager();
        let item = manager.create(b"meta", b"content").unwrap();
        let blob = msgpack_encode(&(3u8, &item.item)).unwrap();
        assert!(matches!(
            manager.cache_load(&blob),
            Err(Error::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn tampered_cache_blob_fails_verification() {
        let manager = manager();
        let item = manager.create(b"meta", b"content").unwrap();

        let mut col = item.item.clone();
        // Swap in a foreign revision uid.
        col.content.uid = crate::crypto::primitives::to_base64(&[0u8; 32]);
        let blob = msgpack_encode(&(crate::CURRENT_VERSION, &col)).unwrap();

        assert!(matches!(
            manager.cache_load(&blob),
            Err(Error::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn transaction_without_stoken_is_a_caller_bug() {
        let manager = manager();
        let mut item = manager.create(b"meta", b"content").unwrap();

        let result = manager.transaction(&mut [&mut item], None, None).await;
        assert!(matches!(result, Err(Error::Programming(_))));

        // Options without a stoken are not enough either.
        let options = FetchOptions::new().limit(5);
        let result = manager
            .transaction(&mut [&mut item], None, Some(&options))
            .await;
        assert!(matches!(result, Err(Error::Programming(_))));
        assert!(item.needs_upload());
    }

    #[tokio::test]
    async fn transaction_with_stoken_passes_validation() {
        // Nothing is listening on this port: getting a network error (not a
        // Programming error) proves validation passed and the write was
        // attempted. The failed upload leaves the item dirty.
        let manager = ItemManager::new(
            Arc::new(Client::new("http://localhost:59999").unwrap()),
            "col-uid".to_string(),
            Arc::new(CollectionCryptoManager::new(random_key(), 1).unwrap()),
        );
        let mut item = manager.create(b"meta", b"content").unwrap();

        let options = FetchOptions::new().stoken("tok-1");
        let result = manager
            .transaction(&mut [&mut item], None, Some(&options))
            .await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert!(item.needs_upload());
    }

    #[tokio::test]
    async fn new_item_with_placeholder_chunks_is_a_caller_bug() {
        let manager = manager();
        let mut item = manager.create(b"meta", b"content").unwrap();
        item.item.content.chunks[0].content = None;

        let result = manager.batch(&mut [&mut item], None, None).await;
        assert!(matches!(result, Err(Error::Programming(_))));
    }
}
