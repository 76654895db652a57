//! The persisted unlock mode and encrypted secret record.

use base64::{engine::general_purpose::STANDARD, Engine};
use relock_crypto::{EncryptedSecret, KeyGeneration, IV_SIZE};
use serde::{Deserialize, Serialize};

use crate::store::{CredentialRepository, DatabaseId, Key};

/// The secret cached in quick-unlock mode.
///
/// Quick-unlock gates re-entry on the partial password, so the biometric
/// path only needs to prove that the gated key still decrypts; a fixed
/// marker is cached instead of anything sensitive. Full-unlock caches the
/// master password itself.
pub const QUICK_UNLOCK_MARKER: &str = "QuickUnlock";

/// How a database can be re-entered after it quick-locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockMode {
    /// Fast re-authentication is off; only the master password unlocks.
    #[default]
    Disabled,
    /// Re-enter via a password suffix or a biometric check of a cached
    /// marker.
    QuickUnlock,
    /// Re-enter via biometric recovery of the cached master password.
    FullUnlock,
}

impl UnlockMode {
    /// Whether this mode stores an encrypted secret under a gated key.
    pub fn needs_gated_key(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// The persisted ciphertext and everything needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecretRecord {
    /// AES-256-CBC/PKCS7 ciphertext of the cached secret.
    pub ciphertext: Vec<u8>,
    /// The IV captured when the secret was encrypted.
    pub iv: [u8; IV_SIZE],
    /// The key id whose gated key encrypted the secret.
    pub owner_key_id: String,
    /// The key generation that encrypted the secret. Decryption under any
    /// other generation fails loudly instead of yielding wrong plaintext.
    pub owner_generation: KeyGeneration,
}

impl EncryptedSecretRecord {
    /// Builds the record for a freshly encrypted secret.
    pub fn new(encrypted: EncryptedSecret, owner_key_id: String) -> Self {
        Self {
            ciphertext: encrypted.ciphertext,
            iv: encrypted.iv,
            owner_key_id,
            owner_generation: encrypted.generation,
        }
    }
}

const UNLOCK_MODE: Key<UnlockMode> = Key::new("unlock_mode");
const SECRET_CIPHERTEXT: Key<String> = Key::new("unlock_secret");
const SECRET_IV: Key<String> = Key::new("unlock_secret_iv");
const SECRET_KEY_ID: Key<String> = Key::new("unlock_secret_key_id");
const SECRET_GENERATION: Key<KeyGeneration> = Key::new("unlock_secret_generation");

/// Reads the unlock mode; absent means [`UnlockMode::Disabled`].
pub fn load_unlock_mode(repo: &CredentialRepository, database: &DatabaseId) -> UnlockMode {
    repo.get(database, &UNLOCK_MODE).unwrap_or_default()
}

/// Persists the unlock mode.
pub(crate) fn store_unlock_mode(
    repo: &CredentialRepository,
    database: &DatabaseId,
    mode: UnlockMode,
) {
    repo.put(database, &UNLOCK_MODE, &mode);
}

/// Reads the secret record. Any missing or malformed part reads as "not
/// configured".
pub fn load_secret_record(
    repo: &CredentialRepository,
    database: &DatabaseId,
) -> Option<EncryptedSecretRecord> {
    let ciphertext = decode_base64(repo.get(database, &SECRET_CIPHERTEXT)?)?;
    let iv: [u8; IV_SIZE] = decode_base64(repo.get(database, &SECRET_IV)?)?
        .try_into()
        .ok()?;
    Some(EncryptedSecretRecord {
        ciphertext,
        iv,
        owner_key_id: repo.get(database, &SECRET_KEY_ID)?,
        owner_generation: repo.get(database, &SECRET_GENERATION)?,
    })
}

/// Persists the secret record.
pub(crate) fn store_secret_record(
    repo: &CredentialRepository,
    database: &DatabaseId,
    record: &EncryptedSecretRecord,
) {
    repo.put(database, &SECRET_CIPHERTEXT, &STANDARD.encode(&record.ciphertext));
    repo.put(database, &SECRET_IV, &STANDARD.encode(record.iv));
    repo.put(database, &SECRET_KEY_ID, &record.owner_key_id);
    repo.put(database, &SECRET_GENERATION, &record.owner_generation);
}

/// Removes every part of the secret record.
pub(crate) fn clear_secret_record(repo: &CredentialRepository, database: &DatabaseId) {
    repo.remove(database, &SECRET_CIPHERTEXT);
    repo.remove(database, &SECRET_IV);
    repo.remove(database, &SECRET_KEY_ID);
    repo.remove(database, &SECRET_GENERATION);
}

fn decode_base64(raw: String) -> Option<Vec<u8>> {
    match STANDARD.decode(&raw) {
        Ok(bytes) => Some(bytes),
        Err(error) => {
            tracing::warn!(%error, "persisted secret record is not valid base64");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::store::MemoryCredentialStore;

    fn repo() -> CredentialRepository {
        CredentialRepository::new(Arc::new(MemoryCredentialStore::new()))
    }

    fn sample_record() -> EncryptedSecretRecord {
        EncryptedSecretRecord {
            ciphertext: vec![1, 2, 3, 4],
            iv: [9u8; IV_SIZE],
            owner_key_id: Uuid::new_v4().to_string(),
            owner_generation: serde_json::from_str(&format!("\"{}\"", Uuid::new_v4()))
                .expect("a uuid string is a valid generation"),
        }
    }

    #[test]
    fn test_absent_mode_reads_as_disabled() {
        assert_eq!(
            load_unlock_mode(&repo(), &DatabaseId::new("db1")),
            UnlockMode::Disabled
        );
    }

    #[test]
    fn test_record_round_trips() {
        let repo = repo();
        let db = DatabaseId::new("db1");
        let record = sample_record();

        store_secret_record(&repo, &db, &record);
        assert_eq!(load_secret_record(&repo, &db), Some(record));
    }

    #[test]
    fn test_cleared_record_reads_as_not_configured() {
        let repo = repo();
        let db = DatabaseId::new("db1");
        store_secret_record(&repo, &db, &sample_record());

        clear_secret_record(&repo, &db);
        assert_eq!(load_secret_record(&repo, &db), None);
    }

    #[test]
    fn test_partial_record_reads_as_not_configured() {
        let repo = repo();
        let db = DatabaseId::new("db1");
        store_secret_record(&repo, &db, &sample_record());

        repo.remove(&db, &SECRET_IV);
        assert_eq!(load_secret_record(&repo, &db), None);
    }
}
