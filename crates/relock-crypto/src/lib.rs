#![doc = include_str!("../README.md")]

mod aes_cbc;
pub use aes_cbc::IV_SIZE;
mod error;
pub(crate) use error::Result;
pub use error::CryptoError;
mod gated_key;
pub use gated_key::{
    key_alias, AuthorizedCipher, GatedKeyStore, KeyGeneration, PendingCipher, SoftwareKeyStore,
    ALIAS_PREFIX,
};
mod secret_cipher;
pub use secret_cipher::{decrypt_secret, encrypt_secret, EncryptedSecret};
