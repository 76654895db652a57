//! Encrypts and decrypts the cached re-authentication secret.
//!
//! The secret is either a dummy marker (quick-unlock mode) or the vault's
//! full master password (full-unlock mode). No plaintext is retained beyond
//! the call; decrypted material is returned in [`Zeroizing`] buffers.

use zeroize::Zeroizing;

use crate::{aes_cbc::IV_SIZE, AuthorizedCipher, CryptoError, KeyGeneration, Result};

/// The output of [`encrypt_secret`]: everything that must be persisted to
/// decrypt the secret later.
#[derive(Clone)]
pub struct EncryptedSecret {
    /// The AES-256-CBC/PKCS7 ciphertext.
    pub ciphertext: Vec<u8>,
    /// The IV the cipher generated at encryption time.
    pub iv: [u8; IV_SIZE],
    /// The key generation that produced the ciphertext.
    pub generation: KeyGeneration,
}

/// Encrypts `secret_text` with a cipher released by a successful challenge.
///
/// The IV is captured from the cipher, never supplied by the caller.
pub fn encrypt_secret(cipher: AuthorizedCipher, secret_text: &str) -> Result<EncryptedSecret> {
    let generation = cipher.generation().clone();
    let ciphertext = cipher.encrypt(secret_text.as_bytes())?;
    Ok(EncryptedSecret {
        iv: ciphertext.iv(),
        ciphertext: ciphertext.encrypted_bytes().to_vec(),
        generation,
    })
}

/// Decrypts a persisted secret with a cipher released by a successful
/// challenge.
///
/// `owner_generation` is the generation recorded when the secret was
/// encrypted. A cipher from any other generation is rejected with
/// [`CryptoError::WrongKeyGeneration`] before the cipher runs; without this
/// check an unauthenticated CBC decryption under the wrong key could hand
/// back garbage instead of failing.
pub fn decrypt_secret(
    cipher: AuthorizedCipher,
    owner_generation: &KeyGeneration,
    ciphertext: &[u8],
) -> Result<Zeroizing<String>> {
    if cipher.generation() != owner_generation {
        return Err(CryptoError::WrongKeyGeneration);
    }
    let plaintext = cipher.decrypt(ciphertext)?;
    let text = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::InvalidUtf8)?;
    Ok(Zeroizing::new(text.to_string()))
}
