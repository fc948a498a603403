//! Collection sharing via signed invitations.

use crate::crypto::managers::{AccountCryptoManager, IdentityCryptoManager};
use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use crate::models::{AccessLevel, SignedInvitation, COLLECTION_KEY_AD, COLLECTION_TYPE_AD};
use crate::sync::client::{msgpack_decode, msgpack_encode, Client};
use crate::sync::collections::Collection;
use crate::sync::models::{InvitationAcceptBody, IteratorListResponse, UserProfile};
use crate::sync::options::FetchOptions;
use std::sync::Arc;
use tracing::info;

const INVITATION_BASE: &str = "api/v1/invitation/";

/// A page of invitations.
pub struct InvitationListResponse {
    pub invitations: Vec<SignedInvitation>,
    pub iterator: Option<String>,
    pub done: bool,
}

/// Sends, receives, accepts and rejects collection invitations.
pub struct CollectionInvitationManager {
    client: Arc<Client>,
    account_crypto_manager: Arc<AccountCryptoManager>,
    identity_crypto_manager: Arc<IdentityCryptoManager>,
}

impl CollectionInvitationManager {
    pub(crate) fn new(
        client: Arc<Client>,
        account_crypto_manager: Arc<AccountCryptoManager>,
        identity_crypto_manager: Arc<IdentityCryptoManager>,
    ) -> Self {
        Self {
            client,
            account_crypto_manager,
            identity_crypto_manager,
        }
    }

    /// Invitations waiting for this account's decision.
    pub async fn list_incoming(
        &self,
        options: Option<&FetchOptions>,
    ) -> Result<InvitationListResponse> {
        self.list(&format!("{}incoming/", INVITATION_BASE), options)
            .await
    }

    /// Invitations this account has sent and the recipients have not yet
    /// answered.
    pub async fn list_outgoing(
        &self,
        options: Option<&FetchOptions>,
    ) -> Result<InvitationListResponse> {
        self.list(&format!("{}outgoing/", INVITATION_BASE), options)
            .await
    }

    /// Invite `username` to the collection.
    ///
    /// The supplied pubkey must match the server's record for that user;
    /// a mismatch means the caller's knowledge of the recipient is stale
    /// (or the server is lying) and has to be reconciled out of band first.
    pub async fn invite(
        &self,
        collection: &Collection,
        username: &str,
        pubkey: &[u8],
        access_level: AccessLevel,
    ) -> Result<()> {
        let profile = self.fetch_user_profile(username).await?;
        let recipient_pub = check_recipient_pubkey(username, &profile.pubkey, pubkey)?;

        let invitation = collection.col.create_invitation(
            &self.account_crypto_manager,
            &self.identity_crypto_manager,
            username,
            &recipient_pub,
            access_level,
        )?;

        self.client
            .post(
                &format!("{}outgoing/", INVITATION_BASE),
                &[],
                msgpack_encode(&invitation)?,
            )
            .await?;
        info!(collection = %collection.uid(), username, "invitation sent");
        Ok(())
    }

    /// Accept an incoming invitation: verify the sender's signature,
    /// recover the collection key, and re-seal it under this account.
    pub async fn accept(&self, invitation: &SignedInvitation) -> Result<()> {
        let (collection_type, collection_key) =
            invitation.decrypt_payload(&self.identity_crypto_manager)?;

        let body = InvitationAcceptBody {
            collection_type: self
                .account_crypto_manager
                .manager
                .encrypt_deterministic(collection_type.as_bytes(), COLLECTION_TYPE_AD)?,
            encryption_key: self
                .account_crypto_manager
                .manager
                .encrypt(collection_key.as_bytes(), COLLECTION_KEY_AD)?,
        };

        self.client
            .post(
                &format!("{}incoming/{}/accept/", INVITATION_BASE, invitation.uid),
                &[],
                msgpack_encode(&body)?,
            )
            .await?;
        info!(collection = %invitation.collection, "invitation accepted");
        Ok(())
    }

    /// Decline an incoming invitation.
    pub async fn reject(&self, invitation: &SignedInvitation) -> Result<()> {
        self.client
            .delete(
                &format!("{}incoming/{}/", INVITATION_BASE, invitation.uid),
                &[],
            )
            .await?;
        Ok(())
    }

    /// Cancel a pending outgoing invitation.
    pub async fn disinvite(&self, invitation: &SignedInvitation) -> Result<()> {
        self.client
            .delete(
                &format!("{}outgoing/{}/", INVITATION_BASE, invitation.uid),
                &[],
            )
            .await?;
        Ok(())
    }

    /// Fetch another user's public identity.
    pub async fn fetch_user_profile(&self, username: &str) -> Result<UserProfile> {
        let response = self
            .client
            .get(
                &format!("{}outgoing/fetch_user_profile/", INVITATION_BASE),
                &[("username", username.to_string())],
            )
            .await?;
        msgpack_decode(&response)
    }

    /// This account's own identity public key, as others see it.
    pub fn pubkey(&self) -> [u8; KEY_SIZE] {
        self.identity_crypto_manager.pubkey()
    }

    async fn list(
        &self,
        path: &str,
        options: Option<&FetchOptions>,
    ) -> Result<InvitationListResponse> {
        let query = options.map(|o| o.to_query(false)).unwrap_or_default();
        let response = self.client.get(path, &query).await?;
        let list: IteratorListResponse<SignedInvitation> = msgpack_decode(&response)?;
        Ok(InvitationListResponse {
            invitations: list.data,
            iterator: list.iterator,
            done: list.done,
        })
    }
}

/// Enforce the invitation contract: the supplied recipient key must match
/// the server's record exactly, byte for byte and in length.
fn check_recipient_pubkey(
    username: &str,
    server_pubkey: &[u8],
    supplied: &[u8],
) -> Result<[u8; KEY_SIZE]> {
    if server_pubkey != supplied {
        return Err(Error::Programming(format!(
            "pubkey mismatch for {}: the server's record differs from the supplied key",
            username
        )));
    }
    supplied
        .try_into()
        .map_err(|_| Error::Programming("recipient pubkey has wrong length".to_string()))
}
