//! # AES-256-CBC operations
//!
//! Contains the low level AES-256-CBC/PKCS7 operations used by the rest of
//! the crate. Use [`encrypt_secret`][crate::encrypt_secret] and
//! [`decrypt_secret`][crate::decrypt_secret] with an
//! [`AuthorizedCipher`][crate::AuthorizedCipher] instead of calling these
//! directly.
//!
//! Note:
//! CBC with PKCS7 padding matches the cipher configuration a hardware
//! keystore exposes for auth-gated keys. It is unauthenticated, which is why
//! every ciphertext also records the key generation that produced it.

use aes::cipher::{block_padding::Pkcs7, typenum::U32, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use generic_array::GenericArray;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::CryptoError;

/// Size in bytes of the cipher IV.
pub const IV_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub(crate) struct Aes256CbcCiphertext {
    iv: [u8; IV_SIZE],
    encrypted_bytes: Vec<u8>,
}

impl Aes256CbcCiphertext {
    pub(crate) fn iv(&self) -> [u8; IV_SIZE] {
        self.iv
    }

    pub(crate) fn encrypted_bytes(&self) -> &[u8] {
        &self.encrypted_bytes
    }
}

pub(crate) fn encrypt_aes256_cbc(
    key: &GenericArray<u8, U32>,
    plaintext_secret_data: &[u8],
) -> Aes256CbcCiphertext {
    let rng = rand::thread_rng();
    encrypt_aes256_cbc_internal(rng, key, plaintext_secret_data)
}

fn encrypt_aes256_cbc_internal(
    mut rng: impl RngCore + CryptoRng,
    key: &GenericArray<u8, U32>,
    plaintext_secret_data: &[u8],
) -> Aes256CbcCiphertext {
    // The IV is generated here, at encryption time, and handed back to the
    // caller alongside the ciphertext. Callers never supply their own.
    let mut iv = [0u8; IV_SIZE];
    rng.fill_bytes(&mut iv);

    let encrypted_bytes = Aes256CbcEnc::new(key, &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext_secret_data);

    Aes256CbcCiphertext {
        iv,
        encrypted_bytes,
    }
}

pub(crate) fn decrypt_aes256_cbc(
    iv: &[u8; IV_SIZE],
    key: &GenericArray<u8, U32>,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    Aes256CbcDec::new(key, &(*iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_SIZE: usize = 32;

    #[test]
    fn test_encrypt_decrypt_aes256_cbc() {
        let key = GenericArray::from([0u8; KEY_SIZE]);
        let plaintext_secret_data = b"My secret data";
        let encrypted = encrypt_aes256_cbc(&key, plaintext_secret_data);
        let decrypted =
            decrypt_aes256_cbc(&encrypted.iv(), &key, encrypted.encrypted_bytes()).unwrap();
        assert_eq!(plaintext_secret_data, decrypted.as_slice());
    }

    #[test]
    fn test_fails_when_iv_changed() {
        let key = GenericArray::from([0u8; KEY_SIZE]);
        let plaintext_secret_data = b"My secret data";

        let encrypted = encrypt_aes256_cbc(&key, plaintext_secret_data);
        let mut wrong_iv = encrypted.iv();
        wrong_iv[0] = wrong_iv[0].wrapping_add(1);
        let result = decrypt_aes256_cbc(&wrong_iv, &key, encrypted.encrypted_bytes());
        // A flipped IV either fails the padding check or garbles the first
        // block; both must be visible to the caller, so we accept an error or
        // a plaintext mismatch, never a silent "success" with matching data.
        match result {
            Err(_) => {}
            Ok(decrypted) => assert_ne!(plaintext_secret_data, decrypted.as_slice()),
        }
    }

    #[test]
    fn test_fails_when_ciphertext_truncated() {
        let key = GenericArray::from([7u8; KEY_SIZE]);
        let plaintext_secret_data = b"A secret that spans multiple cipher blocks for sure";

        let encrypted = encrypt_aes256_cbc(&key, plaintext_secret_data);
        let truncated = &encrypted.encrypted_bytes()[..16];
        let result = decrypt_aes256_cbc(&encrypted.iv(), &key, truncated);
        match result {
            Err(_) => {}
            Ok(decrypted) => assert_ne!(plaintext_secret_data, decrypted.as_slice()),
        }
    }

    #[test]
    fn test_ivs_are_unique_per_encryption() {
        let key = GenericArray::from([1u8; KEY_SIZE]);
        let a = encrypt_aes256_cbc(&key, b"same input");
        let b = encrypt_aes256_cbc(&key, b"same input");
        assert_ne!(a.iv(), b.iv());
    }
}
