//! Gated key lifecycle management.
//!
//! A gated key is created once per key id and may be replaced at any time;
//! replacing it (or a platform-side invalidation, e.g. a biometric
//! re-enrollment) makes every ciphertext produced by the previous generation
//! undecryptable. The [`KeyGeneration`] attached to each cipher exists so
//! that this failure is loud: a record always names the generation that
//! produced it, and decryption with any other generation is rejected before
//! the cipher runs.

use std::{collections::HashMap, pin::Pin};

use aes::cipher::typenum::U32;
use generic_array::GenericArray;
use parking_lot::RwLock;
use rand::RngCore;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing, ZeroizeOnDrop};

use crate::{
    aes_cbc::{self, Aes256CbcCiphertext, IV_SIZE},
    CryptoError, Result,
};

/// Prefix applied to every keystore alias created by this SDK.
pub const ALIAS_PREFIX: &str = "relock.";

/// Builds the keystore alias for a key id.
pub fn key_alias(key_id: &str) -> String {
    format!("{ALIAS_PREFIX}{key_id}")
}

/// Identifies one generation of a gated key.
///
/// A fresh generation is minted every time [`GatedKeyStore::create_key`] runs
/// for a key id, whether or not a key already existed under that id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct KeyGeneration(Uuid);

impl KeyGeneration {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for KeyGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The direction a cipher was initialized for.
#[derive(Clone)]
enum CipherOperation {
    Encrypt,
    Decrypt { iv: [u8; IV_SIZE] },
}

/// Key material released by the keystore.
///
/// Uses a pinned heap allocation so the compiler cannot leave stack copies
/// of the key behind when the struct moves.
#[derive(ZeroizeOnDrop, Clone)]
struct GatedKeyMaterial {
    enc_key: Pin<Box<GenericArray<u8, U32>>>,
}

/// A cipher bound to a gated key that has *not* yet been authorized by a
/// user-presence challenge.
///
/// The pending cipher can be inspected (its [`KeyGeneration`]) and carried
/// into a biometric challenge, but it cannot encrypt or decrypt. The
/// challenge session converts it into an [`AuthorizedCipher`] on success.
pub struct PendingCipher {
    material: GatedKeyMaterial,
    generation: KeyGeneration,
    operation: CipherOperation,
}

impl PendingCipher {
    /// The key generation this cipher is bound to.
    pub fn generation(&self) -> &KeyGeneration {
        &self.generation
    }

    /// Authorizes the cipher for a single operation.
    ///
    /// Only call this after the platform reported a successful challenge for
    /// the crypto object carrying this cipher; calling it without one defeats
    /// the gating on platforms where the SDK enforces it in software.
    pub fn into_authorized(self) -> AuthorizedCipher {
        AuthorizedCipher {
            material: self.material,
            generation: self.generation,
            operation: self.operation,
        }
    }
}

/// A cipher authorized for exactly one operation.
///
/// Both operations consume the cipher; re-use requires a new challenge.
pub struct AuthorizedCipher {
    material: GatedKeyMaterial,
    generation: KeyGeneration,
    operation: CipherOperation,
}

impl AuthorizedCipher {
    /// The key generation this cipher is bound to.
    pub fn generation(&self) -> &KeyGeneration {
        &self.generation
    }

    pub(crate) fn encrypt(self, plaintext: &[u8]) -> Result<Aes256CbcCiphertext> {
        match self.operation {
            CipherOperation::Encrypt => Ok(aes_cbc::encrypt_aes256_cbc(
                &self.material.enc_key,
                plaintext,
            )),
            CipherOperation::Decrypt { .. } => Err(CryptoError::WrongOperation),
        }
    }

    pub(crate) fn decrypt(self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match self.operation {
            CipherOperation::Decrypt { iv } => {
                aes_cbc::decrypt_aes256_cbc(&iv, &self.material.enc_key, ciphertext)
            }
            CipherOperation::Encrypt => Err(CryptoError::WrongOperation),
        }
    }
}

/// Capability interface to a secure keystore holding gated keys.
///
/// Implementations map onto a hardware keystore, an OS keychain coupled with
/// a biometric API, or the bundled [`SoftwareKeyStore`] fallback. All
/// failures other than invalidation collapse into
/// [`CryptoError::KeyStoreFatal`].
pub trait GatedKeyStore: Send + Sync {
    /// Generates an AES-256 key under [`key_alias`]`(key_id)` that requires a
    /// fresh user-presence challenge per use and supports CBC/PKCS7 in both
    /// directions.
    ///
    /// Re-invocation for an existing key id replaces the key and invalidates
    /// all ciphertext produced by the previous generation.
    fn create_key(&self, key_id: &str) -> Result<KeyGeneration>;

    /// Returns a cipher for encrypting under the key. The IV is generated by
    /// the cipher at encryption time.
    fn encrypt_cipher(&self, key_id: &str) -> Result<PendingCipher>;

    /// Returns a cipher for decrypting under the key, initialized with the IV
    /// captured when the ciphertext was produced.
    fn decrypt_cipher(&self, key_id: &str, iv: &[u8; IV_SIZE]) -> Result<PendingCipher>;

    /// Destroys the key. Deleting a key that does not exist is not an error.
    fn delete_key(&self, key_id: &str) -> Result<()>;

    /// Whether a key currently exists under the id.
    fn contains_key(&self, key_id: &str) -> bool;
}

struct KeyEntry {
    material: GatedKeyMaterial,
    generation: KeyGeneration,
    invalidated: bool,
}

/// In-process implementation of [`GatedKeyStore`].
///
/// Serves as the software-only fallback on platforms without a hardware
/// keystore and as the store used by tests. Gating is enforced structurally:
/// the store only ever hands out [`PendingCipher`]s, which a challenge
/// session must authorize. [`SoftwareKeyStore::invalidate_key`] simulates a
/// platform-side invalidation such as a biometric re-enrollment.
#[derive(Default)]
pub struct SoftwareKeyStore {
    keys: RwLock<HashMap<String, KeyEntry>>,
}

impl SoftwareKeyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the key as permanently invalidated, as the platform does when
    /// the biometric enrollment changes. Subsequent cipher requests fail with
    /// [`CryptoError::KeyInvalidated`] until the key is re-created.
    pub fn invalidate_key(&self, key_id: &str) {
        let alias = key_alias(key_id);
        if let Some(entry) = self.keys.write().get_mut(&alias) {
            entry.invalidated = true;
            tracing::debug!(%alias, "gated key invalidated");
        }
    }

    fn with_valid_key<T>(
        &self,
        key_id: &str,
        f: impl FnOnce(&KeyEntry) -> T,
    ) -> Result<T> {
        let alias = key_alias(key_id);
        let keys = self.keys.read();
        let entry = keys
            .get(&alias)
            .ok_or_else(|| CryptoError::KeyStoreFatal(format!("no key under alias {alias}")))?;
        if entry.invalidated {
            return Err(CryptoError::KeyInvalidated);
        }
        Ok(f(entry))
    }
}

impl GatedKeyStore for SoftwareKeyStore {
    fn create_key(&self, key_id: &str) -> Result<KeyGeneration> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let enc_key = Box::pin(GenericArray::clone_from_slice(&bytes));
        bytes.zeroize();

        let generation = KeyGeneration::new();
        let alias = key_alias(key_id);
        let replaced = self
            .keys
            .write()
            .insert(
                alias.clone(),
                KeyEntry {
                    material: GatedKeyMaterial { enc_key },
                    generation: generation.clone(),
                    invalidated: false,
                },
            )
            .is_some();
        tracing::debug!(%alias, replaced, "gated key created");
        Ok(generation)
    }

    fn encrypt_cipher(&self, key_id: &str) -> Result<PendingCipher> {
        self.with_valid_key(key_id, |entry| PendingCipher {
            material: entry.material.clone(),
            generation: entry.generation.clone(),
            operation: CipherOperation::Encrypt,
        })
    }

    fn decrypt_cipher(&self, key_id: &str, iv: &[u8; IV_SIZE]) -> Result<PendingCipher> {
        self.with_valid_key(key_id, |entry| PendingCipher {
            material: entry.material.clone(),
            generation: entry.generation.clone(),
            operation: CipherOperation::Decrypt { iv: *iv },
        })
    }

    fn delete_key(&self, key_id: &str) -> Result<()> {
        self.keys.write().remove(&key_alias(key_id));
        Ok(())
    }

    fn contains_key(&self, key_id: &str) -> bool {
        self.keys.read().contains_key(&key_alias(key_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_uses_app_prefix() {
        assert_eq!(key_alias("db1"), "relock.db1");
    }

    #[test]
    fn test_create_key_mints_new_generation() {
        let store = SoftwareKeyStore::new();
        let g1 = store.create_key("db1").unwrap();
        let g2 = store.create_key("db1").unwrap();
        assert_ne!(g1, g2);
    }

    #[test]
    fn test_cipher_requires_existing_key() {
        let store = SoftwareKeyStore::new();
        assert!(matches!(
            store.encrypt_cipher("missing"),
            Err(CryptoError::KeyStoreFatal(_))
        ));
    }

    #[test]
    fn test_invalidated_key_is_a_distinct_error() {
        let store = SoftwareKeyStore::new();
        store.create_key("db1").unwrap();
        store.invalidate_key("db1");
        assert!(matches!(
            store.encrypt_cipher("db1"),
            Err(CryptoError::KeyInvalidated)
        ));
        assert!(matches!(
            store.decrypt_cipher("db1", &[0u8; IV_SIZE]),
            Err(CryptoError::KeyInvalidated)
        ));
    }

    #[test]
    fn test_recreating_an_invalidated_key_makes_it_usable_again() {
        let store = SoftwareKeyStore::new();
        store.create_key("db1").unwrap();
        store.invalidate_key("db1");
        store.create_key("db1").unwrap();
        assert!(store.encrypt_cipher("db1").is_ok());
    }

    #[test]
    fn test_delete_key_is_idempotent() {
        let store = SoftwareKeyStore::new();
        store.create_key("db1").unwrap();
        store.delete_key("db1").unwrap();
        store.delete_key("db1").unwrap();
        assert!(!store.contains_key("db1"));
    }

    #[test]
    fn test_cipher_direction_is_enforced() {
        let store = SoftwareKeyStore::new();
        store.create_key("db1").unwrap();

        let enc = store.encrypt_cipher("db1").unwrap().into_authorized();
        assert!(matches!(
            enc.decrypt(b"whatever"),
            Err(CryptoError::WrongOperation)
        ));

        let dec = store
            .decrypt_cipher("db1", &[0u8; IV_SIZE])
            .unwrap()
            .into_authorized();
        assert!(matches!(
            dec.encrypt(b"whatever"),
            Err(CryptoError::WrongOperation)
        ));
    }
}
