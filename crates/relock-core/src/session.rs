//! The unlocked / quick-locked / locked state of one open database.

use parking_lot::Mutex;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::{quick_unlock::password_suffix, store::DatabaseId, UnlockOutcome};

/// Errors from session state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The transition is not valid from the current state.
    #[error("The database is not in the required state for this operation")]
    WrongState,
    /// The operation needs the in-memory master password, which is gone.
    #[error("The master password is no longer in memory")]
    PasswordUnavailable,
}

/// Result of counting one failed biometric attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricAttempts {
    /// More attempts remain.
    Remaining(u32),
    /// The limit is reached; biometric stays disabled for this session.
    Exhausted,
}

/// Quick-lock state: what a partial-password guess is checked against.
///
/// The expected suffix and the attempt limit are captured once, when the
/// session arms, and never change afterwards. In particular a later change
/// to the quick-unlock length preference does not shorten the suffix an
/// armed session requires.
struct QuickUnlockState {
    expected_suffix: Zeroizing<String>,
    failed_biometric_attempts: u32,
    max_failed_biometric_attempts: u32,
}

enum SessionState {
    Unlocked,
    QuickLocked(QuickUnlockState),
    Locked,
}

struct SessionInner {
    password: Option<Zeroizing<String>>,
    state: SessionState,
}

/// One open database and its re-authentication state.
///
/// The master password is held in memory only while the session is unlocked
/// or quick-locked; a full lock drops it.
pub struct VaultSession {
    database_id: DatabaseId,
    display_name: String,
    quick_unlock_key_length: usize,
    inner: Mutex<SessionInner>,
}

impl VaultSession {
    /// Creates a session for a database that was just unlocked with its
    /// master password.
    pub fn open(
        database_id: DatabaseId,
        display_name: impl Into<String>,
        master_password: Zeroizing<String>,
        quick_unlock_key_length: usize,
    ) -> Self {
        Self {
            database_id,
            display_name: display_name.into(),
            quick_unlock_key_length,
            inner: Mutex::new(SessionInner {
                password: Some(master_password),
                state: SessionState::Unlocked,
            }),
        }
    }

    /// Creates a session for a known database that is fully locked, e.g.
    /// after an app restart. Only the master password (typed or recovered
    /// biometrically in full-unlock mode) can unlock it.
    pub fn resume_locked(
        database_id: DatabaseId,
        display_name: impl Into<String>,
        quick_unlock_key_length: usize,
    ) -> Self {
        Self {
            database_id,
            display_name: display_name.into(),
            quick_unlock_key_length,
            inner: Mutex::new(SessionInner {
                password: None,
                state: SessionState::Locked,
            }),
        }
    }

    /// The persistence identity of this database.
    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    /// Name shown to the user for this database.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// How many grapheme clusters a quick-unlock suffix for this database
    /// has.
    pub fn quick_unlock_key_length(&self) -> usize {
        self.quick_unlock_key_length
    }

    /// Whether the database is currently unlocked.
    pub fn is_unlocked(&self) -> bool {
        matches!(self.inner.lock().state, SessionState::Unlocked)
    }

    /// Whether the database is quick-locked (idle but not fully locked).
    pub fn is_quick_locked(&self) -> bool {
        matches!(self.inner.lock().state, SessionState::QuickLocked(_))
    }

    /// Whether the database is fully locked.
    pub fn is_locked(&self) -> bool {
        matches!(self.inner.lock().state, SessionState::Locked)
    }

    /// The master password, readable only while unlocked.
    pub fn master_password(&self) -> Option<Zeroizing<String>> {
        let inner = self.inner.lock();
        match inner.state {
            SessionState::Unlocked => inner.password.clone(),
            _ => None,
        }
    }

    /// Transitions from unlocked to quick-locked, arming the partial
    /// password.
    ///
    /// The expected suffix is computed here, from the in-memory password,
    /// and is immutable for the life of the quick-locked state.
    pub fn quick_lock(&self, max_failed_biometric_attempts: u32) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, SessionState::Unlocked) {
            return Err(SessionError::WrongState);
        }
        let password = inner
            .password
            .as_ref()
            .ok_or(SessionError::PasswordUnavailable)?;
        let expected_suffix = password_suffix(password, self.quick_unlock_key_length);
        inner.state = SessionState::QuickLocked(QuickUnlockState {
            expected_suffix,
            failed_biometric_attempts: 0,
            max_failed_biometric_attempts,
        });
        tracing::debug!(database = %self.database_id, "database quick-locked");
        Ok(())
    }

    /// Transitions from quick-locked back to unlocked, after a successful
    /// re-authentication.
    pub fn unlock(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, SessionState::QuickLocked(_)) {
            return Err(SessionError::WrongState);
        }
        inner.state = SessionState::Unlocked;
        tracing::debug!(database = %self.database_id, "database unlocked");
        Ok(())
    }

    /// Unlocks with the full master password, from any state.
    pub fn unlock_with_password(&self, master_password: Zeroizing<String>) {
        let mut inner = self.inner.lock();
        inner.password = Some(master_password);
        inner.state = SessionState::Unlocked;
        tracing::debug!(database = %self.database_id, "database unlocked with password");
    }

    /// Fully locks the database, dropping the in-memory password and any
    /// quick-lock state.
    pub fn lock(&self) {
        let mut inner = self.inner.lock();
        inner.password = None;
        inner.state = SessionState::Locked;
        tracing::debug!(database = %self.database_id, "database locked");
    }

    /// Checks a partial-password guess against the armed suffix.
    ///
    /// A wrong guess is a hard failure: the session is torn down and the
    /// database fully locked, with no retry. This is deliberately asymmetric
    /// with biometric failures, which may retry up to their limit.
    pub fn try_quick_unlock(&self, guess: &str) -> Result<UnlockOutcome, SessionError> {
        let mut inner = self.inner.lock();
        let SessionState::QuickLocked(quick) = &inner.state else {
            return Err(SessionError::WrongState);
        };
        let matches: bool = guess
            .as_bytes()
            .ct_eq(quick.expected_suffix.as_bytes())
            .into();
        if matches {
            inner.state = SessionState::Unlocked;
            tracing::debug!(database = %self.database_id, "quick unlock succeeded");
            Ok(UnlockOutcome::Unlocked)
        } else {
            inner.password = None;
            inner.state = SessionState::Locked;
            tracing::debug!(database = %self.database_id, "quick unlock failed, database locked");
            Ok(UnlockOutcome::HardLocked)
        }
    }

    /// Counts one failed biometric attempt against the session limit.
    pub fn record_biometric_failure(&self) -> Result<BiometricAttempts, SessionError> {
        let mut inner = self.inner.lock();
        let SessionState::QuickLocked(quick) = &mut inner.state else {
            return Err(SessionError::WrongState);
        };
        quick.failed_biometric_attempts = quick.failed_biometric_attempts.saturating_add(1);
        if quick.failed_biometric_attempts >= quick.max_failed_biometric_attempts {
            Ok(BiometricAttempts::Exhausted)
        } else {
            Ok(BiometricAttempts::Remaining(
                quick.max_failed_biometric_attempts - quick.failed_biometric_attempts,
            ))
        }
    }

    /// Whether the biometric attempt limit has been reached in this
    /// session.
    pub fn biometric_exhausted(&self) -> bool {
        let inner = self.inner.lock();
        match &inner.state {
            SessionState::QuickLocked(quick) => {
                quick.failed_biometric_attempts >= quick.max_failed_biometric_attempts
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlocked(password: &str, length: usize) -> VaultSession {
        VaultSession::open(
            DatabaseId::new("db1"),
            "Personal",
            Zeroizing::new(password.to_string()),
            length,
        )
    }

    #[test]
    fn test_password_readable_only_while_unlocked() {
        let session = unlocked("Sesame123!", 3);
        assert_eq!(
            session.master_password().as_deref().map(String::as_str),
            Some("Sesame123!")
        );

        session.quick_lock(3).unwrap();
        assert!(session.master_password().is_none());

        session.unlock().unwrap();
        assert_eq!(
            session.master_password().as_deref().map(String::as_str),
            Some("Sesame123!")
        );

        session.lock();
        assert!(session.master_password().is_none());
    }

    #[test]
    fn test_correct_suffix_unlocks() {
        let session = unlocked("Sesame123!", 3);
        session.quick_lock(3).unwrap();

        assert_eq!(session.try_quick_unlock("23!"), Ok(UnlockOutcome::Unlocked));
        assert!(session.is_unlocked());
    }

    #[test]
    fn test_wrong_suffix_forces_full_lock() {
        let session = unlocked("Sesame123!", 3);
        session.quick_lock(3).unwrap();

        assert_eq!(
            session.try_quick_unlock("x23!"),
            Ok(UnlockOutcome::HardLocked)
        );
        assert!(session.is_locked());
        assert!(session.master_password().is_none());
        // No further quick-unlock attempt is possible.
        assert_eq!(session.try_quick_unlock("23!"), Err(SessionError::WrongState));
    }

    #[test]
    fn test_quick_lock_requires_the_password() {
        let session = VaultSession::resume_locked(DatabaseId::new("db1"), "Personal", 3);
        assert_eq!(session.quick_lock(3), Err(SessionError::WrongState));
    }

    #[test]
    fn test_biometric_attempt_limit() {
        let session = unlocked("Sesame123!", 3);
        session.quick_lock(3).unwrap();

        assert_eq!(
            session.record_biometric_failure(),
            Ok(BiometricAttempts::Remaining(2))
        );
        assert_eq!(
            session.record_biometric_failure(),
            Ok(BiometricAttempts::Remaining(1))
        );
        assert_eq!(
            session.record_biometric_failure(),
            Ok(BiometricAttempts::Exhausted)
        );
        assert!(session.biometric_exhausted());
    }

    #[test]
    fn test_armed_suffix_ignores_later_length_changes() {
        // The suffix is computed at arming time; the session keeps requiring
        // it even if the preference the length came from changes afterwards.
        let session = unlocked("Sesame123!", 4);
        session.quick_lock(3).unwrap();

        assert_eq!(
            session.try_quick_unlock("23!"),
            Ok(UnlockOutcome::HardLocked)
        );
    }

    #[test]
    fn test_unlock_with_password_recovers_a_locked_session() {
        let session = VaultSession::resume_locked(DatabaseId::new("db1"), "Personal", 3);
        session.unlock_with_password(Zeroizing::new("Sesame123!".to_string()));
        assert!(session.is_unlocked());
        assert_eq!(
            session.master_password().as_deref().map(String::as_str),
            Some("Sesame123!")
        );
    }
}
