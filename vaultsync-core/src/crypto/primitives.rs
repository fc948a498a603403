//! Low-level cryptographic primitives.
//!
//! Algorithm choices are fixed for scheme version 1 and must not change
//! without a version bump, since ciphertext produced here is interpreted by
//! every other client of the same account:
//! - Argon2id (3 passes, 256 MiB, 1 lane) for the main key
//! - ChaCha20-Poly1305-IETF for all symmetric envelopes
//! - Keyed BLAKE2b-256 for MACs and subkey derivation
//! - X25519 + HKDF-SHA256 + Ed25519 for signed sealed boxes
//!
//! Symmetric envelope wire format: `nonce(12) || ciphertext || tag(16)`.
//! Sealed box wire format: `ephemeral_pub(32) || nonce(12) || ciphertext || tag(16)`.

use crate::crypto::zero::SecretKey;
use crate::crypto::{
    CryptoError, Result, KEY_SIZE, MAC_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE, UID_LENGTH,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use blake2::digest::consts::U32;
use blake2::digest::{Digest, FixedOutput, KeyInit, Update};
use blake2::{Blake2b, Blake2bMac};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as BoxPublicKey, StaticSecret};

type Blake2bMac256 = Blake2bMac<U32>;
type Blake2b256 = Blake2b<U32>;

/// Argon2id memory cost in KiB (256 MiB), matching the "moderate" preset
/// servers expect for version 1 accounts.
const ARGON2_MEM_KIB: u32 = 262_144;
/// Argon2id pass count for the moderate preset.
const ARGON2_PASSES: u32 = 3;
/// Argon2id lane count for the moderate preset.
const ARGON2_LANES: u32 = 1;

/// HKDF info string for sealed-box key-encryption keys.
const SEALED_BOX_INFO: &[u8] = b"vaultsync sealed box v1";

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Derive the 32-byte main key from a password and salt using Argon2id.
///
/// Deterministic: the same `(salt, password)` always produces the same key.
pub fn derive_key(salt: &[u8], password: &str) -> Result<SecretKey> {
    if salt.len() < SALT_SIZE {
        return Err(CryptoError::KdfFailed(format!(
            "salt too short: {} bytes (minimum {})",
            salt.len(),
            SALT_SIZE
        )));
    }

    let params = Params::new(ARGON2_MEM_KIB, ARGON2_PASSES, ARGON2_LANES, Some(KEY_SIZE))
        .map_err(|e| CryptoError::KdfFailed(format!("invalid parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), &salt[..SALT_SIZE], &mut key)
        .map_err(|e| CryptoError::KdfFailed(format!("hashing failed: {}", e)))?;

    Ok(SecretKey::from_bytes(key))
}

/// Generate `count` cryptographically secure random bytes.
pub fn random_bytes(count: usize) -> Vec<u8> {
    let mut buf = vec![0u8; count];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Generate a fresh random 256-bit key.
pub fn random_key() -> SecretKey {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    SecretKey::from_bytes(bytes)
}

/// Generate a random Argon2id salt.
pub fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a random 24-character base62 entity uid.
pub fn random_uid() -> String {
    let mut rng = rand::thread_rng();
    (0..UID_LENGTH)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect()
}

/// Encrypt with ChaCha20-Poly1305-IETF and a fresh random nonce.
///
/// Returns `nonce || ciphertext || tag`. The associated data is
/// authenticated but not stored; the caller must supply the identical `aad`
/// on decryption.
pub fn aead_encrypt(key: &SecretKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    aead_encrypt_with_nonce(key, &nonce, plaintext, aad)
}

/// Encrypt with a caller-provided nonce.
///
/// Only safe when the nonce is either random or derived from the plaintext
/// itself (deterministic encryption); reusing a nonce for two different
/// plaintexts under one key breaks the cipher.
pub(crate) fn aead_encrypt_with_nonce(
    key: &SecretKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a `nonce || ciphertext || tag` envelope, verifying the tag and
/// the associated data.
pub fn aead_decrypt(key: &SecretKey, envelope: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "envelope too short: {} bytes",
            envelope.len()
        )));
    }

    let (nonce, ciphertext) = envelope.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Keyed BLAKE2b-256 MAC.
pub fn mac(key: &[u8; KEY_SIZE], data: &[u8]) -> Result<[u8; MAC_SIZE]> {
    let mut mac = <Blake2bMac256 as KeyInit>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            got: key.len(),
        })?;
    Update::update(&mut mac, data);
    Ok(mac.finalize_fixed().into())
}

/// Derive a 32-byte subkey from a parent key, an 8-byte context tag, and a
/// subkey id, via keyed BLAKE2b with the context in the personalization
/// field and the id in the salt field.
pub fn derive_subkey(parent: &[u8; KEY_SIZE], context: &[u8; 8], subkey_id: u64) -> Result<SecretKey> {
    let salt = subkey_id.to_le_bytes();
    let mut mac = Blake2bMac256::new_with_salt_and_personal(parent, &salt, context).map_err(
        |_| CryptoError::KdfFailed("invalid subkey derivation parameters".to_string()),
    )?;
    Update::update(&mut mac, &[]);
    let out: [u8; KEY_SIZE] = mac.finalize_fixed().into();
    Ok(SecretKey::from_bytes(out))
}

/// Seal `plaintext` to a recipient's X25519 public key.
///
/// An ephemeral keypair is generated per call; the key-encryption key is
/// HKDF-SHA256 over the ECDH shared secret, salted with both public keys so
/// the ciphertext is bound to this sender/recipient pair.
///
/// Returns `ephemeral_pub(32) || nonce(12) || ciphertext || tag(16)`.
pub fn box_seal(recipient_pub: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_pub = BoxPublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&BoxPublicKey::from(*recipient_pub));

    let kek = derive_box_kek(shared.as_bytes(), ephemeral_pub.as_bytes(), recipient_pub)?;
    let aad = box_aad(ephemeral_pub.as_bytes(), recipient_pub);
    let sealed = aead_encrypt(&kek, plaintext, &aad)?;

    let mut result = Vec::with_capacity(KEY_SIZE + sealed.len());
    result.extend_from_slice(ephemeral_pub.as_bytes());
    result.extend_from_slice(&sealed);
    Ok(result)
}

/// Open a sealed box with the recipient's X25519 secret.
pub fn box_open(recipient_secret: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < KEY_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "sealed box too short: {} bytes",
            sealed.len()
        )));
    }

    let (ephemeral_pub, envelope) = sealed.split_at(KEY_SIZE);
    let ephemeral_pub: [u8; KEY_SIZE] = ephemeral_pub
        .try_into()
        .map_err(|_| CryptoError::MalformedEnvelope("bad ephemeral key".to_string()))?;
    let recipient_pub = BoxPublicKey::from(recipient_secret);

    let shared = recipient_secret.diffie_hellman(&BoxPublicKey::from(ephemeral_pub));
    let kek = derive_box_kek(shared.as_bytes(), &ephemeral_pub, recipient_pub.as_bytes())?;
    let aad = box_aad(&ephemeral_pub, recipient_pub.as_bytes());
    aead_decrypt(&kek, envelope, &aad)
}

fn derive_box_kek(
    shared: &[u8; KEY_SIZE],
    ephemeral_pub: &[u8; KEY_SIZE],
    recipient_pub: &[u8; KEY_SIZE],
) -> Result<SecretKey> {
    let mut salt = Vec::with_capacity(KEY_SIZE * 2);
    salt.extend_from_slice(ephemeral_pub);
    salt.extend_from_slice(recipient_pub);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut kek = [0u8; KEY_SIZE];
    hkdf.expand(SEALED_BOX_INFO, &mut kek)
        .map_err(|e| CryptoError::KdfFailed(format!("HKDF expand failed: {}", e)))?;
    Ok(SecretKey::from_bytes(kek))
}

fn box_aad(ephemeral_pub: &[u8; KEY_SIZE], recipient_pub: &[u8; KEY_SIZE]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(KEY_SIZE * 2);
    aad.extend_from_slice(ephemeral_pub);
    aad.extend_from_slice(recipient_pub);
    aad
}

/// URL-safe unpadded base64, used for chunk uids and persisted key material.
pub fn to_base64(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode URL-safe unpadded base64.
pub fn from_base64(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("invalid base64: {}", e)))
}

/// Constant-time byte comparison.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}

/// Human-comparable fingerprint of a public key: eight groups of five
/// digits, derived from a BLAKE2b digest. Intended for out-of-band identity
/// verification before accepting an invitation.
pub fn pretty_fingerprint(pubkey: &[u8]) -> String {
    let digest: [u8; MAC_SIZE] = Blake2b256::digest(pubkey).into();
    digest
        .chunks_exact(4)
        .map(|chunk| {
            let num = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            format!("{:05}", num % 100_000)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretKey {
        SecretKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn derive_key_is_deterministic() {
        let salt = [1u8; SALT_SIZE];
        let k1 = derive_key(&salt, "hunter2").unwrap();
        let k2 = derive_key(&salt, "hunter2").unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());

        let k3 = derive_key(&salt, "different").unwrap();
        assert_ne!(k1.as_bytes(), k3.as_bytes());

        let other_salt = [2u8; SALT_SIZE];
        let k4 = derive_key(&other_salt, "hunter2").unwrap();
        assert_ne!(k1.as_bytes(), k4.as_bytes());
    }

    #[test]
    fn derive_key_rejects_short_salt() {
        assert!(derive_key(&[0u8; 8], "pw").is_err());
    }

    #[test]
    fn aead_roundtrip() {
        let key = test_key();
        let plaintext = b"hello, encrypted world";

        let envelope = aead_encrypt(&key, plaintext, b"domain").unwrap();
        let decrypted = aead_decrypt(&key, &envelope, b"domain").unwrap();
        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn aead_fresh_nonce_per_call() {
        let key = test_key();
        let e1 = aead_encrypt(&key, b"same", b"").unwrap();
        let e2 = aead_encrypt(&key, b"same", b"").unwrap();
        assert_ne!(&e1[..NONCE_SIZE], &e2[..NONCE_SIZE]);
        assert_ne!(e1, e2);
    }

    #[test]
    fn aead_tampered_ciphertext_fails() {
        let key = test_key();
        let mut envelope = aead_encrypt(&key, b"secret", b"ad").unwrap();
        envelope[NONCE_SIZE] ^= 0xFF;
        assert!(matches!(
            aead_decrypt(&key, &envelope, b"ad"),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn aead_wrong_aad_fails() {
        let key = test_key();
        let envelope = aead_encrypt(&key, b"secret", b"domain-a").unwrap();
        assert!(aead_decrypt(&key, &envelope, b"domain-b").is_err());
    }

    #[test]
    fn aead_truncated_envelope_is_malformed() {
        let key = test_key();
        assert!(matches!(
            aead_decrypt(&key, &[0u8; NONCE_SIZE + TAG_SIZE - 1], b""),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn mac_is_deterministic_and_key_dependent() {
        let m1 = mac(&[1u8; KEY_SIZE], b"data").unwrap();
        let m2 = mac(&[1u8; KEY_SIZE], b"data").unwrap();
        let m3 = mac(&[2u8; KEY_SIZE], b"data").unwrap();
        assert_eq!(m1, m2);
        assert_ne!(m1, m3);
        assert_eq!(m1.len(), MAC_SIZE);
    }

    #[test]
    fn subkeys_differ_by_context_and_id() {
        let parent = [9u8; KEY_SIZE];
        let a = derive_subkey(&parent, b"CtxOne\0\0", 0).unwrap();
        let b = derive_subkey(&parent, b"CtxTwo\0\0", 0).unwrap();
        let c = derive_subkey(&parent, b"CtxOne\0\0", 1).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());

        let again = derive_subkey(&parent, b"CtxOne\0\0", 0).unwrap();
        assert_eq!(a.as_bytes(), again.as_bytes());
    }

    #[test]
    fn sealed_box_roundtrip() {
        let recipient = StaticSecret::random_from_rng(OsRng);
        let recipient_pub = BoxPublicKey::from(&recipient);

        let sealed = box_seal(recipient_pub.as_bytes(), b"collection key here").unwrap();
        let opened = box_open(&recipient, &sealed).unwrap();
        assert_eq!(opened, b"collection key here");
    }

    #[test]
    fn sealed_box_wrong_recipient_fails() {
        let recipient = StaticSecret::random_from_rng(OsRng);
        let recipient_pub = BoxPublicKey::from(&recipient);
        let eavesdropper = StaticSecret::random_from_rng(OsRng);

        let sealed = box_seal(recipient_pub.as_bytes(), b"secret").unwrap();
        assert!(box_open(&eavesdropper, &sealed).is_err());
    }

    #[test]
    fn sealed_box_tamper_detected() {
        let recipient = StaticSecret::random_from_rng(OsRng);
        let recipient_pub = BoxPublicKey::from(&recipient);

        let mut sealed = box_seal(recipient_pub.as_bytes(), b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(box_open(&recipient, &sealed).is_err());
    }

    #[test]
    fn random_uid_shape() {
        let uid = random_uid();
        assert_eq!(uid.len(), UID_LENGTH);
        assert!(uid.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(uid, random_uid());
    }

    #[test]
    fn base64_roundtrip_is_urlsafe() {
        let data = random_bytes(MAC_SIZE);
        let encoded = to_base64(&data);
        assert!(!encoded.contains('+') && !encoded.contains('/') && !encoded.contains('='));
        assert_eq!(from_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn ct_eq_matches_semantics() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"abcd"));
    }

    #[test]
    fn pretty_fingerprint_is_stable_and_grouped() {
        let fp1 = pretty_fingerprint(&[7u8; 32]);
        let fp2 = pretty_fingerprint(&[7u8; 32]);
        assert_eq!(fp1, fp2);

        let groups: Vec<&str> = fp1.split(' ').collect();
        assert_eq!(groups.len(), 8);
        assert!(groups.iter().all(|g| g.len() == 5 && g.chars().all(|c| c.is_ascii_digit())));

        assert_ne!(fp1, pretty_fingerprint(&[8u8; 32]));
    }
}
