//! Errors that can occur during gated-key and cipher operations.

use thiserror::Error;

pub(crate) type Result<T, E = CryptoError> = std::result::Result<T, E>;

/// Errors produced by the gated keystore and the secret cipher wrapper.
///
/// [`CryptoError::KeyInvalidated`] is deliberately kept distinct from every
/// other failure: it is the one keystore condition the user can act on
/// (re-run setup), and callers clear the persisted secret record when they
/// see it. All remaining keystore problems collapse into
/// [`CryptoError::KeyStoreFatal`], which is an environment failure rather
/// than a user error.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The platform reported that the key is no longer valid, typically
    /// because the biometric enrollment changed. Requires explicit re-setup.
    #[error("The gated key has been invalidated and must be set up again")]
    KeyInvalidated,

    /// Any other keystore failure. Not user-actionable; abort, don't retry.
    #[error("Key store failure: {0}")]
    KeyStoreFatal(String),

    /// The ciphertext was produced by a different generation of the key.
    #[error("Ciphertext belongs to a different key generation")]
    WrongKeyGeneration,

    /// The cipher was initialized for the opposite operation.
    #[error("Cipher is not initialized for this operation")]
    WrongOperation,

    /// Decryption failed (bad ciphertext, bad IV or bad padding).
    #[error("Unable to decrypt the stored secret")]
    DecryptionFailed,

    /// The decrypted secret was not valid UTF-8.
    #[error("Decrypted secret is not valid UTF-8")]
    InvalidUtf8,
}
