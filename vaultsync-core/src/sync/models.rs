//! Wire data models: request and response bodies for the server API.

use crate::models::{AccessLevel, EncryptedItem, RemovedMembership};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Login profile returned by signup/login and stored in the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginUser {
    pub username: String,
    pub email: String,
    /// The user's X25519 identity public key.
    #[serde(with = "serde_bytes")]
    pub pubkey: Vec<u8>,
    /// AEAD-sealed `accountKey(32) || identitySeed(32)`.
    #[serde(with = "serde_bytes")]
    pub encrypted_content: Vec<u8>,
}

/// Signup/login input: who the account belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginChallengeRequest<'a> {
    pub username: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginChallenge {
    #[serde(with = "serde_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub challenge: Vec<u8>,
    pub version: u8,
}

/// Signed challenge response; `response` is the canonical JSON blob the
/// signature covers.
#[derive(Debug, Serialize)]
pub(crate) struct LoginBody {
    #[serde(with = "serde_bytes")]
    pub response: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub token: String,
    pub user: LoginUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignupBody<'a> {
    pub user: &'a User,
    #[serde(with = "serde_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub login_pubkey: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub pubkey: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub encrypted_content: Vec<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PasswordChangeBody {
    #[serde(with = "serde_bytes")]
    pub response: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub login_pubkey: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub encrypted_content: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DashboardResponse {
    pub url: String,
}

/// Stoken-paged list response (collections, items).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound = "T: DeserializeOwned")]
pub(crate) struct ListResponse<T> {
    pub data: Vec<T>,
    pub stoken: Option<String>,
    pub done: bool,
    pub removed_memberships: Option<Vec<RemovedMembership>>,
}

/// Iterator-paged list response (invitations, members, revisions).
#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
pub(crate) struct IteratorListResponse<T> {
    pub data: Vec<T>,
    pub iterator: Option<String>,
    pub done: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CollectionListRequest {
    pub collection_types: Vec<serde_bytes::ByteBuf>,
}

/// A `(uid, etag)` concurrency gate for batch/transaction dependencies and
/// `fetch_updates`.
#[derive(Debug, Serialize)]
pub(crate) struct ItemDep {
    pub uid: String,
    pub etag: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ItemBatchBody<'a> {
    pub items: Vec<&'a EncryptedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deps: Option<Vec<ItemDep>>,
}

/// Another user's public identity, as served by the profile endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    #[serde(with = "serde_bytes")]
    pub pubkey: Vec<u8>,
}

/// A collection member as listed by the member endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMember {
    pub username: String,
    pub access_level: AccessLevel,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberAccessLevelPatch {
    pub access_level: AccessLevel,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InvitationAcceptBody {
    #[serde(with = "serde_bytes")]
    pub collection_type: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub encryption_key: Vec<u8>,
}
