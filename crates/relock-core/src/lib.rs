#![doc = include_str!("../README.md")]

mod context;
pub use context::{AppContext, SecurityPreferences, MAX_FAILED_BIOMETRIC_ATTEMPTS};
mod error;
pub use error::{ErrorCategory, SetupError};
mod quick_unlock;
pub use quick_unlock::{
    password_suffix, BiometricUnlock, PromptHint, QuickUnlockController, UnlockOutcome,
};
mod record;
pub use record::{
    load_secret_record, load_unlock_mode, EncryptedSecretRecord, UnlockMode, QUICK_UNLOCK_MARKER,
};
mod session;
pub use session::{BiometricAttempts, SessionError, VaultSession};
mod setup;
pub use setup::{SetupController, SetupOutcome, SetupStep};
mod store;
pub use store::{CredentialRepository, CredentialStore, DatabaseId, Key, MemoryCredentialStore};
