//! Collection membership administration.
//!
//! Thin authenticated wrappers; authorization is entirely server-enforced
//! and surfaces as PermissionDenied.

use crate::error::Result;
use crate::models::AccessLevel;
use crate::sync::client::{msgpack_decode, msgpack_encode, Client};
use crate::sync::models::{CollectionMember, IteratorListResponse, MemberAccessLevelPatch};
use crate::sync::options::FetchOptions;
use std::sync::Arc;

/// A page of collection members.
pub struct MemberListResponse {
    pub members: Vec<CollectionMember>,
    pub iterator: Option<String>,
    pub done: bool,
}

/// Lists and administers one collection's members.
pub struct MemberManager {
    client: Arc<Client>,
    collection_uid: String,
}

impl MemberManager {
    pub(crate) fn new(client: Arc<Client>, collection_uid: String) -> Self {
        Self {
            client,
            collection_uid,
        }
    }

    fn base_path(&self) -> String {
        format!("api/v1/collection/{}/member/", self.collection_uid)
    }

    pub async fn list(&self, options: Option<&FetchOptions>) -> Result<MemberListResponse> {
        let query = options.map(|o| o.to_query(false)).unwrap_or_default();
        let response = self.client.get(&self.base_path(), &query).await?;
        let list: IteratorListResponse<CollectionMember> = msgpack_decode(&response)?;
        Ok(MemberListResponse {
            members: list.data,
            iterator: list.iterator,
            done: list.done,
        })
    }

    /// Remove a member. Note that removal is server-enforced only; truly
    /// revoking access cryptographically requires re-creating the
    /// collection under a fresh key.
    pub async fn remove(&self, username: &str) -> Result<()> {
        self.client
            .delete(&format!("{}{}/", self.base_path(), username), &[])
            .await?;
        Ok(())
    }

    pub async fn modify_access_level(
        &self,
        username: &str,
        access_level: AccessLevel,
    ) -> Result<()> {
        self.client
            .patch(
                &format!("{}{}/", self.base_path(), username),
                &[],
                msgpack_encode(&MemberAccessLevelPatch { access_level })?,
            )
            .await?;
        Ok(())
    }

    /// Leave a collection someone else shared with this account.
    pub async fn leave(&self) -> Result<()> {
        self.client
            .post(&format!("{}leave/", self.base_path()), &[], Vec::new())
            .await?;
        Ok(())
    }
}
