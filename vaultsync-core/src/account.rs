//! Account lifecycle: signup, login, token refresh, password change,
//! logout, and save/restore.
//!
//! The account exclusively owns the main key. The derived account and
//! identity crypto managers are cached for the account's lifetime and
//! invalidated on logout and password change; both of those mutating paths
//! take `&mut self` and are therefore serialized against every other use of
//! the account by construction.

use crate::crypto::managers::{
    AccountCryptoManager, IdentityCryptoManager, LoginCryptoManager, MainCryptoManager,
};
use crate::crypto::primitives::{derive_key, from_base64, random_key, random_salt, to_base64};
use crate::crypto::zero::{zeroize_bytes, SecretKey};
use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use crate::sync::client::{msgpack_decode, msgpack_encode, Client};
use crate::sync::collections::CollectionManager;
use crate::sync::invitations::CollectionInvitationManager;
use crate::sync::models::{
    DashboardResponse, LoginBody, LoginChallenge, LoginChallengeRequest, LoginResponse,
    PasswordChangeBody, SignupBody, User,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Domain tag for the account's sealed `accountKey || identitySeed` blob.
const CONTENT_AD: &[u8] = b"AcctContent";

const AUTH_BASE: &str = "api/v1/authentication/";

/// The canonical JSON blob covered by the login signature.
#[derive(Serialize)]
struct ChallengeResponse<'a> {
    username: &'a str,
    challenge: String,
    host: String,
    action: &'a str,
}

/// Persisted account state; `key` is the base64 main key.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountData {
    version: u8,
    key: String,
    user: crate::sync::models::LoginUser,
    server_url: String,
    auth_token: Option<String>,
}

type CachedManagers = (Arc<AccountCryptoManager>, Arc<IdentityCryptoManager>);

/// A logged-in account: the root object everything else derives from.
pub struct Account {
    client: Arc<Client>,
    version: u8,
    main_key: SecretKey,
    user: crate::sync::models::LoginUser,
    auth_token: Option<String>,
    closed: bool,
    managers: Mutex<Option<CachedManagers>>,
}

impl Account {
    /// Create a new account on the server and log in as it.
    pub async fn signup(client: Client, user: &User, password: &str) -> Result<Self> {
        let salt = random_salt();
        let main_key = derive_key(&salt, password)?;
        let main_crypto_manager = MainCryptoManager::new(&main_key, crate::CURRENT_VERSION)?;
        let login_crypto_manager = main_crypto_manager.login_crypto_manager()?;

        let account_key = random_key();
        let identity_seed = random_key();
        let identity_crypto_manager =
            main_crypto_manager.identity_crypto_manager(&identity_seed)?;

        let mut content = Vec::with_capacity(KEY_SIZE * 2);
        content.extend_from_slice(account_key.as_bytes());
        content.extend_from_slice(identity_seed.as_bytes());
        let encrypted_content = main_crypto_manager.encrypt(&content, CONTENT_AD);
        zeroize_bytes(&mut content);
        let encrypted_content = encrypted_content?;

        let body = SignupBody {
            user,
            salt: salt.to_vec(),
            login_pubkey: login_crypto_manager.pubkey().to_vec(),
            pubkey: identity_crypto_manager.pubkey().to_vec(),
            encrypted_content,
        };
        let response = client
            .post(
                &format!("{}signup/", AUTH_BASE),
                &[],
                msgpack_encode(&body)?,
            )
            .await?;
        let login: LoginResponse = msgpack_decode(&response)?;
        client.set_token(Some(login.token.clone()));

        info!(username = %user.username, "account created");
        Ok(Self {
            client: Arc::new(client),
            version: crate::CURRENT_VERSION,
            main_key,
            user: login.user,
            auth_token: Some(login.token),
            closed: false,
            managers: Mutex::new(None),
        })
    }

    /// Log in with a username and password.
    pub async fn login(client: Client, username: &str, password: &str) -> Result<Self> {
        let challenge = fetch_challenge(&client, username).await?;
        let main_key = derive_key(&challenge.salt, password)?;

        let login = send_challenge_response(&client, &main_key, username, &challenge).await?;
        client.set_token(Some(login.token.clone()));

        info!(username, "logged in");
        Ok(Self {
            client: Arc::new(client),
            version: challenge.version,
            main_key,
            user: login.user,
            auth_token: Some(login.token),
            closed: false,
            managers: Mutex::new(None),
        })
    }

    /// Re-run the login handshake with the existing main key to obtain a
    /// fresh auth token.
    pub async fn fetch_token(&mut self) -> Result<()> {
        self.ensure_open()?;
        let challenge = fetch_challenge(&self.client, &self.user.username).await?;
        let login =
            send_challenge_response(&self.client, &self.main_key, &self.user.username, &challenge)
                .await?;
        self.client.set_token(Some(login.token.clone()));
        self.auth_token = Some(login.token);
        Ok(())
    }

    /// Revoke the token server-side (best effort) and destroy local key
    /// material. The account is unusable afterwards.
    pub async fn logout(&mut self) -> Result<()> {
        if let Err(err) = self
            .client
            .post(&format!("{}logout/", AUTH_BASE), &[], Vec::new())
            .await
        {
            warn!(error = %err, "server-side logout failed; discarding local session anyway");
        }

        self.client.set_token(None);
        self.auth_token = None;
        self.main_key = SecretKey::from_bytes([0u8; KEY_SIZE]);
        self.closed = true;
        self.invalidate_managers()?;
        Ok(())
    }

    /// Change the account password.
    ///
    /// The account content is re-sealed under the new main key and the new
    /// login public key replaces the old one, all gated on a signature with
    /// the new login key. Local state only changes after the server accepts.
    pub async fn change_password(&mut self, new_password: &str) -> Result<()> {
        self.ensure_open()?;
        let challenge = fetch_challenge(&self.client, &self.user.username).await?;

        let old_main_crypto_manager = MainCryptoManager::new(&self.main_key, self.version)?;
        let mut content = old_main_crypto_manager.decrypt(&self.user.encrypted_content, CONTENT_AD)?;

        let new_main_key = derive_key(&challenge.salt, new_password)?;
        let new_main_crypto_manager = MainCryptoManager::new(&new_main_key, self.version)?;
        let new_login_crypto_manager = new_main_crypto_manager.login_crypto_manager()?;
        let encrypted_content = new_main_crypto_manager.encrypt(&content, CONTENT_AD);
        zeroize_bytes(&mut content);
        let encrypted_content = encrypted_content?;

        let (response, signature) = sign_challenge(
            &new_login_crypto_manager,
            &self.user.username,
            &challenge,
            self.client.host(),
            "changePassword",
        )?;
        let body = PasswordChangeBody {
            response,
            signature,
            login_pubkey: new_login_crypto_manager.pubkey().to_vec(),
            encrypted_content: encrypted_content.clone(),
        };
        self.client
            .post(
                &format!("{}change_password/", AUTH_BASE),
                &[],
                msgpack_encode(&body)?,
            )
            .await?;

        self.main_key = new_main_key;
        self.user.encrypted_content = encrypted_content;
        self.invalidate_managers()?;

        info!(username = %self.user.username, "password changed");
        Ok(())
    }

    /// Fetch the URL of the server's account dashboard.
    pub async fn fetch_dashboard_url(&self) -> Result<String> {
        self.ensure_open()?;
        let response = self
            .client
            .post(&format!("{}dashboard_url/", AUTH_BASE), &[], Vec::new())
            .await?;
        let dashboard: DashboardResponse = msgpack_decode(&response)?;
        Ok(dashboard.url)
    }

    /// Serialize the account for the app to persist.
    pub fn save(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        msgpack_encode(&AccountData {
            version: self.version,
            key: to_base64(self.main_key.as_bytes()),
            user: self.user.clone(),
            server_url: self.client.server_url().to_string(),
            auth_token: self.auth_token.clone(),
        })
    }

    /// Restore an account previously serialized with [`save`](Self::save).
    pub fn restore(data: &[u8]) -> Result<Self> {
        let data: AccountData = msgpack_decode(data)?;
        if data.version != crate::CURRENT_VERSION {
            return Err(Error::UnsupportedVersion(data.version));
        }

        let client = Client::new(&data.server_url)?;
        client.set_token(data.auth_token.clone());
        let main_key = SecretKey::from_slice(&from_base64(&data.key)?)?;

        Ok(Self {
            client: Arc::new(client),
            version: data.version,
            main_key,
            user: data.user,
            auth_token: data.auth_token,
            closed: false,
            managers: Mutex::new(None),
        })
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }

    /// The manager for this account's collections.
    pub fn collection_manager(&self) -> Result<CollectionManager> {
        let (account_crypto_manager, _) = self.crypto_managers()?;
        Ok(CollectionManager::new(
            self.client.clone(),
            account_crypto_manager,
        ))
    }

    /// The manager for this account's incoming and outgoing invitations.
    pub fn invitation_manager(&self) -> Result<CollectionInvitationManager> {
        let (account_crypto_manager, identity_crypto_manager) = self.crypto_managers()?;
        Ok(CollectionInvitationManager::new(
            self.client.clone(),
            account_crypto_manager,
            identity_crypto_manager,
        ))
    }

    /// Decrypt `encryptedContent` and derive the account and identity
    /// managers, caching them for the account's lifetime.
    fn crypto_managers(&self) -> Result<CachedManagers> {
        self.ensure_open()?;
        let mut guard = self
            .managers
            .lock()
            .map_err(|_| Error::Programming("manager cache lock poisoned".to_string()))?;

        if let Some(managers) = guard.as_ref() {
            return Ok(managers.clone());
        }

        let main_crypto_manager = MainCryptoManager::new(&self.main_key, self.version)?;
        let mut content = main_crypto_manager.decrypt(&self.user.encrypted_content, CONTENT_AD)?;
        if content.len() != KEY_SIZE * 2 {
            let length = content.len();
            zeroize_bytes(&mut content);
            return Err(Error::Integrity(format!(
                "account content has wrong length: {}",
                length
            )));
        }

        let account_key = SecretKey::from_slice(&content[..KEY_SIZE])?;
        let identity_seed = SecretKey::from_slice(&content[KEY_SIZE..])?;
        zeroize_bytes(&mut content);

        let managers: CachedManagers = (
            Arc::new(main_crypto_manager.account_crypto_manager(account_key)?),
            Arc::new(main_crypto_manager.identity_crypto_manager(&identity_seed)?),
        );
        *guard = Some(managers.clone());
        Ok(managers)
    }

    fn invalidate_managers(&self) -> Result<()> {
        let mut guard = self
            .managers
            .lock()
            .map_err(|_| Error::Programming("manager cache lock poisoned".to_string()))?;
        *guard = None;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Programming(
                "account is logged out; no further operations are possible".to_string(),
            ));
        }
        Ok(())
    }
}

async fn fetch_challenge(client: &Client, username: &str) -> Result<LoginChallenge> {
    let response = client
        .post(
            &format!("{}login_challenge/", AUTH_BASE),
            &[],
            msgpack_encode(&LoginChallengeRequest { username })?,
        )
        .await?;
    let challenge: LoginChallenge = msgpack_decode(&response)?;
    if challenge.version != crate::CURRENT_VERSION {
        return Err(Error::UnsupportedVersion(challenge.version));
    }
    Ok(challenge)
}

fn sign_challenge(
    login_crypto_manager: &LoginCryptoManager,
    username: &str,
    challenge: &LoginChallenge,
    host: String,
    action: &str,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let response = serde_json::to_vec(&ChallengeResponse {
        username,
        challenge: to_base64(&challenge.challenge),
        host,
        action,
    })?;
    let signature = login_crypto_manager.sign(&response).to_vec();
    Ok((response, signature))
}

async fn send_challenge_response(
    client: &Client,
    main_key: &SecretKey,
    username: &str,
    challenge: &LoginChallenge,
) -> Result<LoginResponse> {
    let main_crypto_manager = MainCryptoManager::new(main_key, challenge.version)?;
    let login_crypto_manager = main_crypto_manager.login_crypto_manager()?;
    let (response, signature) = sign_challenge(
        &login_crypto_manager,
        username,
        challenge,
        client.host(),
        "login",
    )?;

    let body = client
        .post(
            &format!("{}login/", AUTH_BASE),
            &[],
            msgpack_encode(&LoginBody {
                response,
                signature,
            })?,
        )
        .await?;
    msgpack_decode(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::LoginUser;

    /// Build an account entirely offline, the way signup would.
    fn offline_account(password: &str) -> Account {
        let salt = random_salt();
        let main_key = derive_key(&salt, password).unwrap();
        let main_crypto_manager =
            MainCryptoManager::new(&main_key, crate::CURRENT_VERSION).unwrap();

        let account_key = random_key();
        let identity_seed = random_key();
        let identity = main_crypto_manager
            .identity_crypto_manager(&identity_seed)
            .unwrap();

        let mut content = Vec::with_capacity(KEY_SIZE * 2);
        content.extend_from_slice(account_key.as_bytes());
        content.extend_from_slice(identity_seed.as_bytes());
        let encrypted_content = main_crypto_manager.encrypt(&content, CONTENT_AD).unwrap();

        Account {
            client: Arc::new(Client::new("http://localhost:8000").unwrap()),
            version: crate::CURRENT_VERSION,
            main_key,
            user: LoginUser {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                pubkey: identity.pubkey().to_vec(),
                encrypted_content,
            },
            auth_token: Some("token-1".to_string()),
            closed: false,
            managers: Mutex::new(None),
        }
    }

    #[test]
    fn save_restore_roundtrips_derived_managers() {
        let account = offline_account("password-1");
        let (_, identity_before) = account.crypto_managers().unwrap();

        let saved = account.save().unwrap();
        let restored = Account::restore(&saved).unwrap();

        assert_eq!(restored.username(), "alice");
        assert_eq!(restored.client.server_url(), "http://localhost:8000/");

        // The restored account derives the same identity keys.
        let (_, identity_after) = restored.crypto_managers().unwrap();
        assert_eq!(identity_before.pubkey(), identity_after.pubkey());
        assert_eq!(identity_before.verify_key(), identity_after.verify_key());
    }

    #[test]
    fn restore_refuses_unknown_versions() {
        let account = offline_account("pw");
        let saved = account.save().unwrap();

        let mut data: AccountData = msgpack_decode(&saved).unwrap();
        data.version = 7;
        let tampered = msgpack_encode(&data).unwrap();

        assert!(matches!(
            Account::restore(&tampered),
            Err(Error::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn wrong_main_key_cannot_open_account_content() {
        let mut account = offline_account("correct-password");
        // Simulate a wrong password: a different main key.
        account.main_key = random_key();

        assert!(matches!(
            account.crypto_managers(),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn managers_are_cached_until_invalidated() {
        let account = offline_account("pw");
        let (first, _) = account.crypto_managers().unwrap();
        let (second, _) = account.crypto_managers().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        account.invalidate_managers().unwrap();
        let (third, _) = account.crypto_managers().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn closed_account_fails_loudly() {
        let mut account = offline_account("pw");
        account.closed = true;

        assert!(matches!(
            account.crypto_managers(),
            Err(Error::Programming(_))
        ));
        assert!(matches!(account.save(), Err(Error::Programming(_))));
    }

    #[test]
    fn challenge_signature_verifies_against_login_pubkey() {
        let main_key = derive_key(&random_salt(), "pw").unwrap();
        let login = MainCryptoManager::new(&main_key, crate::CURRENT_VERSION)
            .unwrap()
            .login_crypto_manager()
            .unwrap();
        let challenge = LoginChallenge {
            salt: vec![0; 16],
            challenge: vec![7; 32],
            version: crate::CURRENT_VERSION,
        };

        let (response, signature) =
            sign_challenge(&login, "alice", &challenge, "localhost:8000".into(), "login").unwrap();

        assert!(LoginCryptoManager::verify(&response, &signature, &login.pubkey()).is_ok());

        // The signed blob carries the expected JSON fields.
        let json: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["action"], "login");
        assert_eq!(json["host"], "localhost:8000");
    }
}
