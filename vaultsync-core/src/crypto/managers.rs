//! Layered crypto managers.
//!
//! Key hierarchy:
//!
//! ```text
//! Main Key (Argon2id from password + salt)
//!   ├── LoginCryptoManager    (Ed25519, challenge signing — never stored)
//!   ├── AccountCryptoManager  (wraps the random account key)
//!   │     └── CollectionCryptoManager (per-collection key, sealed per member)
//!   │           └── ItemCryptoManager (per-item key or the collection key)
//!   │                 └── meta/chunk envelopes + revision MACs
//!   └── IdentityCryptoManager (Ed25519 + X25519, invitation sign/seal)
//! ```
//!
//! Every manager scopes its AEAD and MAC keys with an 8-byte context tag so
//! sibling entities can never decrypt each other's envelopes, and every AEAD
//! call takes a caller-supplied associated-data domain tag on top of that.

use crate::crypto::primitives::{self, aead_encrypt_with_nonce};
use crate::crypto::zero::SecretKey;
use crate::crypto::{CryptoError, Result, KEY_SIZE, MAC_SIZE, NONCE_SIZE};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use x25519_dalek::{PublicKey as BoxPublicKey, StaticSecret};

const MAIN_CONTEXT: &[u8; 8] = b"Main\0\0\0\0";
const LOGIN_CONTEXT: &[u8; 8] = b"Login\0\0\0";
const ACCOUNT_CONTEXT: &[u8; 8] = b"Acct\0\0\0\0";
const IDENTITY_BOX_CONTEXT: &[u8; 8] = b"BoxSeed\0";
const COLLECTION_CONTEXT: &[u8; 8] = b"Col\0\0\0\0\0";
const ITEM_CONTEXT: &[u8; 8] = b"ColItem\0";

const SUBKEY_CIPHER: u64 = 1;
const SUBKEY_MAC: u64 = 2;

/// Size of an Ed25519 signature
pub const SIGNATURE_SIZE: usize = 64;

/// Shared core of every symmetric manager: the entity key plus its derived
/// cipher and MAC subkeys.
pub struct CryptoManager {
    version: u8,
    key: SecretKey,
    cipher_key: SecretKey,
    mac_key: SecretKey,
}

impl CryptoManager {
    fn new(key: SecretKey, context: &[u8; 8], version: u8) -> Result<Self> {
        let cipher_key = primitives::derive_subkey(key.as_bytes(), context, SUBKEY_CIPHER)?;
        let mac_key = primitives::derive_subkey(key.as_bytes(), context, SUBKEY_MAC)?;
        Ok(Self {
            version,
            key,
            cipher_key,
            mac_key,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// The wrapped entity key, for deriving child managers.
    pub(crate) fn key(&self) -> &SecretKey {
        &self.key
    }

    /// AEAD-seal `plaintext` under this manager's cipher key, bound to the
    /// given associated-data domain tag.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        primitives::aead_encrypt(&self.cipher_key, plaintext, aad)
    }

    /// Open an envelope produced by [`encrypt`](Self::encrypt) with the same
    /// domain tag.
    pub fn decrypt(&self, envelope: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        primitives::aead_decrypt(&self.cipher_key, envelope, aad)
    }

    /// Deterministic AEAD: the nonce is the keyed MAC of the plaintext, so
    /// equal plaintexts under one key yield byte-identical envelopes.
    ///
    /// Used only where equality must survive encryption: collection type
    /// tags (server-side type scoping) and content chunks (deduplication).
    pub fn encrypt_deterministic(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut input = Vec::with_capacity(aad.len() + plaintext.len() + 1);
        input.push(0x4e); // nonce-derivation domain separator
        input.extend_from_slice(aad);
        input.extend_from_slice(plaintext);
        let digest = self.mac(&input)?;
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&digest[..NONCE_SIZE]);
        aead_encrypt_with_nonce(&self.cipher_key, &nonce, plaintext, aad)
    }

    /// Keyed MAC under this manager's MAC subkey.
    pub fn mac(&self, data: &[u8]) -> Result<[u8; MAC_SIZE]> {
        primitives::mac(self.mac_key.as_bytes(), data)
    }
}

/// Root manager derived from the main key; everything else hangs off it.
pub struct MainCryptoManager {
    manager: CryptoManager,
}

impl MainCryptoManager {
    pub fn new(main_key: &SecretKey, version: u8) -> Result<Self> {
        Ok(Self {
            manager: CryptoManager::new(main_key.clone(), MAIN_CONTEXT, version)?,
        })
    }

    /// Ed25519 login keypair, derived deterministically from the main key so
    /// the same password always signs challenges with the same key.
    pub fn login_crypto_manager(&self) -> Result<LoginCryptoManager> {
        let seed = primitives::derive_subkey(self.manager.key().as_bytes(), LOGIN_CONTEXT, 0)?;
        Ok(LoginCryptoManager::from_seed(&seed))
    }

    pub fn account_crypto_manager(&self, account_key: SecretKey) -> Result<AccountCryptoManager> {
        AccountCryptoManager::new(account_key, self.manager.version())
    }

    pub fn identity_crypto_manager(&self, identity_seed: &SecretKey) -> Result<IdentityCryptoManager> {
        IdentityCryptoManager::from_seed(identity_seed)
    }

    /// Seal the account's `encryptedContent` blob.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.manager.encrypt(plaintext, aad)
    }

    pub fn decrypt(&self, envelope: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.manager.decrypt(envelope, aad)
    }
}

/// Ed25519 signer for the login challenge handshake.
pub struct LoginCryptoManager {
    signing_key: SigningKey,
}

impl LoginCryptoManager {
    fn from_seed(seed: &SecretKey) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed.as_bytes()),
        }
    }

    pub fn pubkey(&self) -> [u8; KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    pub fn verify(message: &[u8], signature: &[u8], pubkey: &[u8; KEY_SIZE]) -> Result<()> {
        let signature: [u8; SIGNATURE_SIZE] = signature
            .try_into()
            .map_err(|_| CryptoError::BadSignature)?;
        let key = VerifyingKey::from_bytes(pubkey).map_err(|_| CryptoError::BadSignature)?;
        key.verify(message, &Signature::from_bytes(&signature))
            .map_err(|_| CryptoError::BadSignature)
    }
}

/// Wraps the account key; seals collection keys and type tags.
pub struct AccountCryptoManager {
    pub(crate) manager: CryptoManager,
}

impl AccountCryptoManager {
    pub fn new(account_key: SecretKey, version: u8) -> Result<Self> {
        Ok(Self {
            manager: CryptoManager::new(account_key, ACCOUNT_CONTEXT, version)?,
        })
    }

    pub fn version(&self) -> u8 {
        self.manager.version()
    }
}

/// Long-lived identity keypair used to sign and seal invitations.
///
/// Both keys are derived from the single identity seed stored inside the
/// account's `encryptedContent`: the seed is the Ed25519 signing key, and
/// the X25519 box secret is a subkey of it.
pub struct IdentityCryptoManager {
    signing_key: SigningKey,
    box_secret: StaticSecret,
}

impl IdentityCryptoManager {
    pub fn from_seed(seed: &SecretKey) -> Result<Self> {
        let box_seed = primitives::derive_subkey(seed.as_bytes(), IDENTITY_BOX_CONTEXT, 0)?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(seed.as_bytes()),
            box_secret: StaticSecret::from(*box_seed.as_bytes()),
        })
    }

    /// X25519 public key, published in the user profile; invitations are
    /// sealed to it.
    pub fn pubkey(&self) -> [u8; KEY_SIZE] {
        BoxPublicKey::from(&self.box_secret).to_bytes()
    }

    /// Ed25519 verifying key, carried in invitations as `fromPubkey`.
    pub fn verify_key(&self) -> [u8; KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Seal `plaintext` to a recipient and sign the sealed box.
    ///
    /// Output: `signature(64) || ephemeral_pub(32) || nonce(12) || ct || tag(16)`.
    pub fn box_seal_signed(
        &self,
        recipient_pub: &[u8; KEY_SIZE],
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let sealed = primitives::box_seal(recipient_pub, plaintext)?;
        let signature = self.signing_key.sign(&sealed);

        let mut result = Vec::with_capacity(SIGNATURE_SIZE + sealed.len());
        result.extend_from_slice(&signature.to_bytes());
        result.extend_from_slice(&sealed);
        Ok(result)
    }

    /// Verify the sender's signature, then open the sealed box with our
    /// box secret. Signature verification comes first so a forged envelope
    /// is rejected before any decryption is attempted.
    pub fn box_open_signed(
        &self,
        sender_verify_key: &[u8; KEY_SIZE],
        blob: &[u8],
    ) -> Result<Vec<u8>> {
        if blob.len() < SIGNATURE_SIZE {
            return Err(CryptoError::MalformedEnvelope(format!(
                "signed box too short: {} bytes",
                blob.len()
            )));
        }
        let (signature, sealed) = blob.split_at(SIGNATURE_SIZE);
        let signature: [u8; SIGNATURE_SIZE] = signature
            .try_into()
            .map_err(|_| CryptoError::BadSignature)?;

        let key =
            VerifyingKey::from_bytes(sender_verify_key).map_err(|_| CryptoError::BadSignature)?;
        key.verify(sealed, &Signature::from_bytes(&signature))
            .map_err(|_| CryptoError::BadSignature)?;

        primitives::box_open(&self.box_secret, sealed)
    }
}

/// Wraps a collection's symmetric key.
pub struct CollectionCryptoManager {
    pub(crate) manager: CryptoManager,
}

impl CollectionCryptoManager {
    pub fn new(collection_key: SecretKey, version: u8) -> Result<Self> {
        Ok(Self {
            manager: CryptoManager::new(collection_key, COLLECTION_CONTEXT, version)?,
        })
    }

    pub fn version(&self) -> u8 {
        self.manager.version()
    }

    /// Build the manager for one of this collection's items.
    ///
    /// `item_key` is the item's own key when it carries one; otherwise the
    /// collection key is used directly (the item context still separates the
    /// derived subkeys from the collection's own envelopes).
    pub fn item_crypto_manager(&self, item_key: Option<SecretKey>) -> Result<ItemCryptoManager> {
        let key = item_key.unwrap_or_else(|| self.manager.key().clone());
        ItemCryptoManager::new(key, self.manager.version())
    }
}

/// Seals item meta and content chunks; produces revision and chunk MACs.
pub struct ItemCryptoManager {
    pub(crate) manager: CryptoManager,
}

impl ItemCryptoManager {
    pub fn new(item_key: SecretKey, version: u8) -> Result<Self> {
        Ok(Self {
            manager: CryptoManager::new(item_key, ITEM_CONTEXT, version)?,
        })
    }
}
