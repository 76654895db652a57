//! The quick-unlock screen's two re-authentication paths.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use relock_biometric::{BiometricAvailability, BiometricChallengeSession, BiometricOutcome};
use relock_crypto::CryptoError;
use unicode_segmentation::UnicodeSegmentation;
use zeroize::Zeroizing;

use crate::{
    context::AppContext,
    error::{categorize, ErrorCategory},
    record::{self, UnlockMode, QUICK_UNLOCK_MARKER},
    session::{BiometricAttempts, SessionError, VaultSession},
};

/// The last `length` grapheme clusters of `password`.
///
/// Grapheme clusters are the unit of comparison: a password ending in a
/// multi-code-unit character yields a suffix of exactly `length`
/// user-perceived characters. A password shorter than `length` yields the
/// whole password.
pub fn password_suffix(password: &str, length: usize) -> Zeroizing<String> {
    let clusters: Vec<&str> = password.graphemes(true).collect();
    let start = clusters.len().saturating_sub(length);
    Zeroizing::new(clusters[start..].concat())
}

/// Result of a partial-password attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The guess matched; the database is unlocked.
    Unlocked,
    /// The guess was wrong; the database is now fully locked.
    HardLocked,
}

/// What the quick-unlock screen may reveal about the expected suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptHint {
    /// Show the user how many characters to type.
    Length(usize),
    /// Reveal nothing.
    Hidden,
}

/// Result of the biometric re-authentication path.
#[derive(Debug, PartialEq, Eq)]
pub enum BiometricUnlock {
    /// The challenge passed and the database is unlocked.
    Unlocked,
    /// Too many rejected readings; biometric is off for this session.
    AttemptsExhausted,
    /// The challenge ended with a platform error; retry is optional.
    Error(String),
    /// The gated key no longer decrypts the record. The record has been
    /// cleared and the mode disabled; the user must run setup again.
    ReSetupRequired,
    /// No biometric path applies right now (no hardware, nothing
    /// configured, or the session is in the wrong state).
    Unavailable,
    /// The challenge was deliberately cancelled.
    Cancelled,
}

/// Drives re-authentication for one quick-unlock screen.
///
/// At most one controller should exist per screen; [`close`][Self::close]
/// must run on pause or teardown so no platform callback outlives it.
pub struct QuickUnlockController {
    context: Arc<AppContext>,
    session: Arc<VaultSession>,
    biometric: BiometricChallengeSession,
    closed: AtomicBool,
}

impl QuickUnlockController {
    /// Creates a controller for the given session.
    pub fn new(context: Arc<AppContext>, session: Arc<VaultSession>) -> Self {
        let biometric = BiometricChallengeSession::new(Arc::clone(context.prompt()));
        Self {
            context,
            session,
            biometric,
            closed: AtomicBool::new(false),
        }
    }

    /// The session this controller re-authenticates.
    pub fn session(&self) -> &Arc<VaultSession> {
        &self.session
    }

    /// What the screen may tell the user about the expected suffix.
    pub fn prompt_hint(&self) -> PromptHint {
        if self.context.preferences().hide_quick_unlock_length {
            PromptHint::Hidden
        } else {
            PromptHint::Length(self.session.quick_unlock_key_length())
        }
    }

    /// Whether the biometric button should be offered at all.
    pub fn biometric_available(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) || self.session.biometric_exhausted() {
            return false;
        }
        if self.biometric.availability() != BiometricAvailability::Available {
            return false;
        }
        let repo = self.context.credentials();
        let db = self.session.database_id();
        record::load_unlock_mode(repo, db).needs_gated_key()
            && record::load_secret_record(repo, db).is_some()
    }

    /// Checks a partial-password guess.
    ///
    /// A wrong guess locks the database and closes this controller.
    pub fn try_password(&self, guess: &str) -> Result<UnlockOutcome, SessionError> {
        let outcome = self.session.try_quick_unlock(guess)?;
        if outcome == UnlockOutcome::HardLocked {
            self.close();
        }
        Ok(outcome)
    }

    /// Runs one biometric challenge to completion.
    ///
    /// Drives the platform prompt and consumes its outcome: on success the
    /// cached secret is decrypted and used to unlock; rejected readings
    /// count against the session limit; an invalidated key clears the
    /// persisted record and disables the mode.
    pub async fn run_biometric(&self) -> BiometricUnlock {
        if self.closed.load(Ordering::SeqCst) {
            return BiometricUnlock::Unavailable;
        }
        if self.session.biometric_exhausted() {
            return BiometricUnlock::AttemptsExhausted;
        }

        let repo = self.context.credentials();
        let db = self.session.database_id();
        let mode = record::load_unlock_mode(repo, db);
        let Some(secret_record) = record::load_secret_record(repo, db) else {
            return BiometricUnlock::Unavailable;
        };
        match mode {
            UnlockMode::Disabled => return BiometricUnlock::Unavailable,
            // Quick-unlock only re-enters a quick-locked session; a fully
            // locked database needs the master password.
            UnlockMode::QuickUnlock if !self.session.is_quick_locked() => {
                return BiometricUnlock::Unavailable;
            }
            UnlockMode::FullUnlock if self.session.is_unlocked() => {
                return BiometricUnlock::Unavailable;
            }
            _ => {}
        }

        let pending = match self
            .context
            .keystore()
            .decrypt_cipher(&secret_record.owner_key_id, &secret_record.iv)
        {
            Ok(pending) => pending,
            Err(error) => return self.handle_crypto_error(error),
        };

        let Some(mut outcomes) = self.biometric.start_listening(pending) else {
            return BiometricUnlock::Unavailable;
        };

        loop {
            match outcomes.next().await {
                None => return BiometricUnlock::Cancelled,
                Some(BiometricOutcome::Failed) => {
                    if let Ok(BiometricAttempts::Exhausted) = self.session.record_biometric_failure()
                    {
                        self.biometric.stop_listening();
                        return BiometricUnlock::AttemptsExhausted;
                    }
                }
                Some(BiometricOutcome::Error(message)) => return BiometricUnlock::Error(message),
                Some(BiometricOutcome::Succeeded(cipher)) => {
                    let secret = match relock_crypto::decrypt_secret(
                        cipher,
                        &secret_record.owner_generation,
                        &secret_record.ciphertext,
                    ) {
                        Ok(secret) => secret,
                        Err(error) => return self.handle_crypto_error(error),
                    };
                    return match mode {
                        UnlockMode::QuickUnlock => {
                            if secret.as_str() != QUICK_UNLOCK_MARKER
                                || self.session.unlock().is_err()
                            {
                                return BiometricUnlock::Error(
                                    ErrorCategory::Fatal.user_message().to_string(),
                                );
                            }
                            BiometricUnlock::Unlocked
                        }
                        UnlockMode::FullUnlock => {
                            self.session.unlock_with_password(secret);
                            BiometricUnlock::Unlocked
                        }
                        UnlockMode::Disabled => BiometricUnlock::Unavailable,
                    };
                }
            }
        }
    }

    /// Reacts to an external "all databases locked" event.
    ///
    /// If no registered session is still open, this screen is stale and
    /// closes itself rather than keep showing a prompt. Returns whether it
    /// closed.
    pub fn on_external_lock(&self) -> bool {
        if self.context.has_open_sessions() {
            return false;
        }
        self.close();
        true
    }

    /// Stops any listening challenge and retires the controller.
    pub fn close(&self) {
        self.biometric.stop_listening();
        self.closed.store(true, Ordering::SeqCst);
    }

    fn handle_crypto_error(&self, error: CryptoError) -> BiometricUnlock {
        let category = categorize(&error);
        tracing::warn!(%error, "biometric unlock failed");
        match category {
            ErrorCategory::KeyInvalidation => {
                let repo = self.context.credentials();
                let db = self.session.database_id();
                record::clear_secret_record(repo, db);
                record::store_unlock_mode(repo, db, UnlockMode::Disabled);
                BiometricUnlock::ReSetupRequired
            }
            _ => BiometricUnlock::Error(category.user_message().to_string()),
        }
    }
}

impl Drop for QuickUnlockController {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_of_ascii_password() {
        assert_eq!(password_suffix("Sesame123!", 3).as_str(), "23!");
    }

    #[test]
    fn test_suffix_counts_grapheme_clusters_not_code_units() {
        // The flag is one user-perceived character built from two scalars.
        assert_eq!(password_suffix("pass🇩🇪x", 2).as_str(), "🇩🇪x");
        // Combining mark: "e" + U+0301 is one cluster.
        assert_eq!(password_suffix("cafe\u{301}", 1).as_str(), "e\u{301}");
    }

    #[test]
    fn test_short_password_yields_whole_password() {
        assert_eq!(password_suffix("ab", 5).as_str(), "ab");
        assert_eq!(password_suffix("", 3).as_str(), "");
    }
}
