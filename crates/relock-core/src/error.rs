//! Error taxonomy for the re-authentication flows.

use relock_crypto::CryptoError;
use thiserror::Error;

/// Category of a re-authentication failure.
///
/// Every failure the user can see maps onto exactly one category, and the
/// user-visible text comes from the category, never from raw keystore or
/// platform error text. Secrets and partial secrets never appear in any of
/// these messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Biometric hardware or enrollment unavailable. Surfaced once, then
    /// the feature is hidden; never retried.
    Configuration,
    /// The gated key was invalidated (e.g. biometric re-enrollment). The
    /// persisted record is cleared and explicit re-setup is required.
    KeyInvalidation,
    /// One bad biometric reading. Retryable up to the attempt limit.
    TransientAuthFailure,
    /// A wrong partial-password guess. Never retried; escalates to a full
    /// lock.
    HardAuthFailure,
    /// A keystore or environment failure. Not user-actionable beyond
    /// re-running setup.
    Fatal,
}

impl ErrorCategory {
    /// The message shown to the user for this category.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Configuration => "Biometric unlock is not available on this device.",
            Self::KeyInvalidation => {
                "Biometric unlock was reset because the device enrollment changed. \
                 Please set it up again."
            }
            Self::TransientAuthFailure => "Not recognized. Try again.",
            Self::HardAuthFailure => "Wrong quick unlock code. The database has been locked.",
            Self::Fatal => "Biometric unlock failed. Please unlock with your password.",
        }
    }
}

/// Maps a keystore/cipher failure onto its user-facing category.
pub(crate) fn categorize(error: &CryptoError) -> ErrorCategory {
    match error {
        CryptoError::KeyInvalidated | CryptoError::WrongKeyGeneration => {
            ErrorCategory::KeyInvalidation
        }
        CryptoError::KeyStoreFatal(_)
        | CryptoError::WrongOperation
        | CryptoError::DecryptionFailed
        | CryptoError::InvalidUtf8 => ErrorCategory::Fatal,
    }
}

/// Errors from the setup flow.
#[derive(Debug, Error)]
pub enum SetupError {
    /// No biometric challenge can be presented, so a mode that needs
    /// confirmation cannot be armed.
    #[error("Biometric authentication is not available")]
    BiometricUnavailable,

    /// Full-unlock mode caches the master password, which is only readable
    /// while the database is unlocked.
    #[error("The database must be unlocked to change its unlock mode")]
    SessionLocked,

    /// A mode change is already waiting for confirmation.
    #[error("A mode change is already in progress")]
    ChangeInProgress,

    /// The keystore failed while staging or confirming the change.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_invalidation_is_never_conflated_with_wrong_credentials() {
        assert_eq!(
            categorize(&CryptoError::KeyInvalidated),
            ErrorCategory::KeyInvalidation
        );
        assert_eq!(
            categorize(&CryptoError::WrongKeyGeneration),
            ErrorCategory::KeyInvalidation
        );
        assert_ne!(
            categorize(&CryptoError::KeyInvalidated),
            ErrorCategory::HardAuthFailure
        );
    }

    #[test]
    fn test_fatal_messages_do_not_echo_keystore_text() {
        let error = CryptoError::KeyStoreFatal("alias relock.db1 missing".into());
        let message = categorize(&error).user_message();
        assert!(!message.contains("relock.db1"));
    }
}
