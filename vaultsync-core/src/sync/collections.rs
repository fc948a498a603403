//! Collection handles and the collection sync manager.

use crate::crypto::managers::{AccountCryptoManager, CollectionCryptoManager, ItemCryptoManager};
use crate::error::{Error, Result};
use crate::models::{AccessLevel, EncryptedCollection, RemovedMembership};
use crate::sync::client::{msgpack_decode, msgpack_encode, Client};
use crate::sync::items::{upload_chunks, ItemManager};
use crate::sync::members::MemberManager;
use crate::sync::models::{CollectionListRequest, ListResponse};
use crate::sync::options::FetchOptions;
use std::sync::Arc;
use tracing::{debug, info};

const COLLECTION_BASE: &str = "api/v1/collection/";

/// A decryptable handle around an [`EncryptedCollection`]: the envelope
/// plus its unsealed crypto managers.
pub struct Collection {
    pub(crate) col: EncryptedCollection,
    pub(crate) crypto_manager: Arc<CollectionCryptoManager>,
    item_crypto_manager: Arc<ItemCryptoManager>,
}

impl Collection {
    pub(crate) fn new(
        col: EncryptedCollection,
        crypto_manager: Arc<CollectionCryptoManager>,
    ) -> Result<Self> {
        let item_crypto_manager = Arc::new(col.item.crypto_manager(&crypto_manager)?);
        Ok(Self {
            col,
            crypto_manager,
            item_crypto_manager,
        })
    }

    pub fn uid(&self) -> &str {
        self.col.uid()
    }

    pub fn etag(&self) -> String {
        self.col.etag()
    }

    pub fn stoken(&self) -> Option<&str> {
        self.col.stoken.as_deref()
    }

    pub fn access_level(&self) -> AccessLevel {
        self.col.access_level
    }

    pub fn needs_upload(&self) -> bool {
        self.col.needs_upload()
    }

    pub fn is_deleted(&self) -> bool {
        self.col.is_deleted()
    }

    pub fn meta(&self) -> Result<Vec<u8>> {
        self.col.item.meta(&self.item_crypto_manager)
    }

    pub fn set_meta(&mut self, meta: &[u8]) -> Result<()> {
        self.col.item.set_meta(&self.item_crypto_manager, meta)
    }

    pub fn content_bytes(&self) -> Result<Vec<u8>> {
        self.col.item.decrypted_content(&self.item_crypto_manager)
    }

    pub fn content_string(&self) -> Result<String> {
        String::from_utf8(self.content_bytes()?)
            .map_err(|_| Error::Encoding("collection content is not UTF-8".into()))
    }

    pub fn set_content(&mut self, content: &[u8]) -> Result<()> {
        self.col.item.set_content(&self.item_crypto_manager, content)
    }

    /// Mark the collection deleted; syncs like any other edit.
    pub fn delete(&mut self) -> Result<()> {
        self.col.item.delete(&self.item_crypto_manager)
    }

    pub fn verify(&self) -> Result<()> {
        self.col.verify(&self.crypto_manager)
    }

    /// Memberships the server reported as removed since the request stoken.
    pub fn removed_memberships(&self) -> Option<&[RemovedMembership]> {
        self.col.removed_memberships.as_deref()
    }
}

/// A page of collections.
pub struct CollectionListResponse {
    pub collections: Vec<Collection>,
    pub stoken: Option<String>,
    pub done: bool,
    pub removed_memberships: Option<Vec<RemovedMembership>>,
}

/// Creates, fetches and uploads collections for one account.
pub struct CollectionManager {
    client: Arc<Client>,
    account_crypto_manager: Arc<AccountCryptoManager>,
}

impl CollectionManager {
    pub(crate) fn new(
        client: Arc<Client>,
        account_crypto_manager: Arc<AccountCryptoManager>,
    ) -> Self {
        Self {
            client,
            account_crypto_manager,
        }
    }

    /// Create a new local collection. Nothing reaches the server until
    /// [`upload`](Self::upload).
    pub fn create(
        &self,
        collection_type: &str,
        meta: &[u8],
        content: &[u8],
    ) -> Result<Collection> {
        let col = EncryptedCollection::create(
            &self.account_crypto_manager,
            collection_type,
            meta,
            content,
        )?;
        let crypto_manager = Arc::new(col.crypto_manager(&self.account_crypto_manager)?);
        Collection::new(col, crypto_manager)
    }

    /// Fetch a single collection by uid.
    pub async fn fetch(&self, col_uid: &str, options: Option<&FetchOptions>) -> Result<Collection> {
        let query = options.map(|o| o.to_query(true)).unwrap_or_default();
        let response = self
            .client
            .get(&format!("{}{}/", COLLECTION_BASE, col_uid), &query)
            .await?;
        let col: EncryptedCollection = msgpack_decode(&response)?;
        self.attach(col)
    }

    /// List collections of the given types.
    pub async fn list(
        &self,
        collection_types: &[&str],
        options: Option<&FetchOptions>,
    ) -> Result<CollectionListResponse> {
        let request = CollectionListRequest {
            collection_types: collection_types
                .iter()
                .map(|collection_type| {
                    self.account_crypto_manager
                        .manager
                        .encrypt_deterministic(
                            collection_type.as_bytes(),
                            crate::models::COLLECTION_TYPE_AD,
                        )
                        .map(serde_bytes::ByteBuf::from)
                })
                .collect::<std::result::Result<_, _>>()?,
        };

        let query = options.map(|o| o.to_query(true)).unwrap_or_default();
        let response = self
            .client
            .post(
                &format!("{}list_multi/", COLLECTION_BASE),
                &query,
                msgpack_encode(&request)?,
            )
            .await?;
        let list: ListResponse<EncryptedCollection> = msgpack_decode(&response)?;

        let collections = list
            .data
            .into_iter()
            .map(|col| self.attach(col))
            .collect::<Result<Vec<_>>>()?;
        debug!(count = collections.len(), "listed collections");

        Ok(CollectionListResponse {
            collections,
            stoken: list.stoken,
            done: list.done,
            removed_memberships: list.removed_memberships,
        })
    }

    /// Upload a collection: create when it has never been saved, update
    /// (gated on the stored etag) otherwise.
    pub async fn upload(
        &self,
        collection: &mut Collection,
        options: Option<&FetchOptions>,
    ) -> Result<()> {
        self.push(collection, options, None).await
    }

    /// Like [`upload`](Self::upload), but additionally gated on the
    /// collection's sync token: the server rejects the write if the
    /// collection's timeline advanced past it.
    pub async fn transaction(
        &self,
        collection: &mut Collection,
        options: Option<&FetchOptions>,
    ) -> Result<()> {
        let stoken = options
            .and_then(|o| o.stoken.clone())
            .or_else(|| collection.col.stoken.clone())
            .ok_or_else(|| {
                Error::Programming(
                    "transaction requires a stoken; fetch the collection first".to_string(),
                )
            })?;
        self.push(collection, options, Some(stoken)).await
    }

    async fn push(
        &self,
        collection: &mut Collection,
        options: Option<&FetchOptions>,
        stoken: Option<String>,
    ) -> Result<()> {
        let col_uid = collection.uid().to_string();
        upload_chunks(&self.client, &col_uid, &mut collection.col.item).await?;

        let mut query = options.map(|o| o.to_query(false)).unwrap_or_default();
        if let Some(stoken) = stoken {
            query.push(("stoken", stoken));
        }

        let body = msgpack_encode(&collection.col)?;
        if collection.col.item.last_etag.is_some() {
            self.client
                .put(&format!("{}{}/", COLLECTION_BASE, col_uid), &query, body)
                .await?;
        } else {
            self.client.post(COLLECTION_BASE, &query, body).await?;
        }

        collection.col.mark_saved();
        info!(collection = %col_uid, "collection uploaded");
        Ok(())
    }

    /// Decrypt a collection's type tag.
    pub fn collection_type(&self, collection: &Collection) -> Result<String> {
        collection
            .col
            .decrypted_collection_type(&self.account_crypto_manager)
    }

    /// Serialize a collection's encrypted state for the app's cache.
    pub fn cache_save(&self, collection: &Collection) -> Result<Vec<u8>> {
        msgpack_encode(&(crate::CURRENT_VERSION, &collection.col))
    }

    /// Restore a collection from [`cache_save`](Self::cache_save) output.
    pub fn cache_load(&self, data: &[u8]) -> Result<Collection> {
        let (version, col): (u8, EncryptedCollection) = msgpack_decode(data)?;
        if version != crate::CURRENT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        self.attach(col)
    }

    /// The item manager scoped to this collection.
    pub fn item_manager(&self, collection: &Collection) -> Result<ItemManager> {
        Ok(ItemManager::new(
            self.client.clone(),
            collection.uid().to_string(),
            collection.crypto_manager.clone(),
        ))
    }

    /// The member manager scoped to this collection.
    pub fn member_manager(&self, collection: &Collection) -> Result<MemberManager> {
        Ok(MemberManager::new(
            self.client.clone(),
            collection.uid().to_string(),
        ))
    }

    /// Attach crypto managers to a fetched envelope and verify it.
    fn attach(&self, col: EncryptedCollection) -> Result<Collection> {
        let crypto_manager = Arc::new(col.crypto_manager(&self.account_crypto_manager)?);
        let collection = Collection::new(col, crypto_manager)?;
        collection.verify()?;
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::random_key;

    fn manager() -> CollectionManager {
        CollectionManager::new(
            Arc::new(Client::new("http://localhost:8000").unwrap()),
            Arc::new(AccountCryptoManager::new(random_key(), 1).unwrap()),
        )
    }

    #[test]
    fn created_collection_reads_back_and_is_unsaved() {
        let manager = manager();
        let collection = manager
            .create("notes", b"{\"name\":\"Notes\"}", b"hello")
            .unwrap();

        assert!(collection.needs_upload());
        assert_eq!(collection.access_level(), AccessLevel::Admin);
        assert_eq!(collection.content_string().unwrap(), "hello");
        assert_eq!(collection.meta().unwrap(), b"{\"name\":\"Notes\"}");
        assert_eq!(manager.collection_type(&collection).unwrap(), "notes");
        collection.verify().unwrap();
    }

    #[test]
    fn edits_change_the_etag() {
        let manager = manager();
        let mut collection = manager.create("notes", b"meta", b"v1").unwrap();
        let before = collection.etag();

        collection.set_content(b"v2").unwrap();
        assert_ne!(collection.etag(), before);
        assert_eq!(collection.content_bytes().unwrap(), b"v2");
    }

    #[test]
    fn delete_flag_propagates() {
        let manager = manager();
        let mut collection = manager.create("notes", b"meta", b"body").unwrap();
        collection.delete().unwrap();
        assert!(collection.is_deleted());
        collection.verify().unwrap();
    }

    #[test]
    fn cache_roundtrip_preserves_everything() {
        let manager = manager();
        let mut collection = manager.create("notes", b"meta", b"body").unwrap();
        collection.col.mark_saved();

        let blob = manager.cache_save(&collection).unwrap();
        let restored = manager.cache_load(&blob).unwrap();

        assert_eq!(restored.uid(), collection.uid());
        assert_eq!(restored.etag(), collection.etag());
        assert!(!restored.needs_upload());
        assert_eq!(restored.content_bytes().unwrap(), b"body");
    }

    #[test]
    fn cache_load_refuses_future_versions() {
        let manager = manager();
        let collection = manager.create("notes", b"meta", b"body").unwrap();

        let blob = msgpack_encode(&(9u8, &collection.col)).unwrap();
        assert!(matches!(
            manager.cache_load(&blob),
            Err(Error::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn foreign_account_cannot_attach() {
        let manager = manager();
        let collection = manager.create("notes", b"meta", b"body").unwrap();

        let other = CollectionManager::new(
            Arc::new(Client::new("http://localhost:8000").unwrap()),
            Arc::new(AccountCryptoManager::new(random_key(), 1).unwrap()),
        );
        let blob = manager.cache_save(&collection).unwrap();
        assert!(matches!(
            other.cache_load(&blob),
            Err(Error::Integrity(_))
        ));
    }
}
