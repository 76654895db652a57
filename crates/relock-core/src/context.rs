//! The explicitly passed application context.
//!
//! Everything the flows need (keystore, prompt, persistence, preferences,
//! open sessions) hangs off one [`AppContext`] handed to each controller.
//! There is no global state.

use std::sync::Arc;

use parking_lot::RwLock;
use relock_biometric::BiometricPrompt;
use relock_crypto::GatedKeyStore;
use zeroize::Zeroizing;

use crate::{
    session::{SessionError, VaultSession},
    store::{CredentialRepository, CredentialStore, DatabaseId},
};

/// How many rejected biometric readings one session tolerates before the
/// biometric option is disabled for its remainder.
pub const MAX_FAILED_BIOMETRIC_ATTEMPTS: u32 = 3;

/// User preferences affecting the re-authentication flows.
#[derive(Debug, Clone)]
pub struct SecurityPreferences {
    /// Grapheme clusters in a quick-unlock suffix, captured when a session
    /// is opened. Already-open sessions keep the length they were opened
    /// with.
    pub quick_unlock_length: usize,
    /// Whether the quick-unlock screen hides how long the suffix is.
    pub hide_quick_unlock_length: bool,
    /// Whether too many failed biometric readings close the database
    /// entirely instead of leaving the partial-password fallback.
    pub close_database_after_failed_biometric: bool,
}

impl Default for SecurityPreferences {
    fn default() -> Self {
        Self {
            quick_unlock_length: 3,
            hide_quick_unlock_length: false,
            close_database_after_failed_biometric: false,
        }
    }
}

/// Shared context for all re-authentication flows.
pub struct AppContext {
    keystore: Arc<dyn GatedKeyStore>,
    prompt: Arc<dyn BiometricPrompt>,
    credentials: CredentialRepository,
    sessions: RwLock<Vec<Arc<VaultSession>>>,
    preferences: RwLock<SecurityPreferences>,
}

impl AppContext {
    /// Builds a context from the host's platform adapters.
    pub fn new(
        keystore: Arc<dyn GatedKeyStore>,
        prompt: Arc<dyn BiometricPrompt>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            keystore,
            prompt,
            credentials: CredentialRepository::new(credentials),
            sessions: RwLock::new(Vec::new()),
            preferences: RwLock::new(SecurityPreferences::default()),
        }
    }

    /// The gated keystore.
    pub fn keystore(&self) -> &Arc<dyn GatedKeyStore> {
        &self.keystore
    }

    /// The platform biometric prompt.
    pub fn prompt(&self) -> &Arc<dyn BiometricPrompt> {
        &self.prompt
    }

    /// Typed credential persistence.
    pub fn credentials(&self) -> &CredentialRepository {
        &self.credentials
    }

    /// A snapshot of the current preferences.
    pub fn preferences(&self) -> SecurityPreferences {
        self.preferences.read().clone()
    }

    /// Replaces the preferences. Already-armed sessions are unaffected.
    pub fn set_preferences(&self, preferences: SecurityPreferences) {
        *self.preferences.write() = preferences;
    }

    /// Registers an open database session.
    pub fn add_session(&self, session: Arc<VaultSession>) {
        self.sessions.write().push(session);
    }

    /// Creates and registers a session for a database that was just
    /// unlocked with its master password.
    ///
    /// The quick-unlock length is captured from the current preferences;
    /// later preference changes do not affect this session.
    pub fn open_session(
        &self,
        database_id: DatabaseId,
        display_name: impl Into<String>,
        master_password: Zeroizing<String>,
    ) -> Arc<VaultSession> {
        let session = Arc::new(VaultSession::open(
            database_id,
            display_name,
            master_password,
            self.preferences().quick_unlock_length,
        ));
        self.add_session(session.clone());
        session
    }

    /// Creates and registers a session for a known database that is fully
    /// locked, e.g. after an app restart.
    pub fn resume_session(
        &self,
        database_id: DatabaseId,
        display_name: impl Into<String>,
    ) -> Arc<VaultSession> {
        let session = Arc::new(VaultSession::resume_locked(
            database_id,
            display_name,
            self.preferences().quick_unlock_length,
        ));
        self.add_session(session.clone());
        session
    }

    /// Looks up a session by database identity.
    pub fn session(&self, database: &DatabaseId) -> Option<Arc<VaultSession>> {
        self.sessions
            .read()
            .iter()
            .find(|s| s.database_id() == database)
            .cloned()
    }

    /// Quick-locks a session, arming its partial password with the limits
    /// the current preferences imply.
    pub fn quick_lock(&self, session: &VaultSession) -> Result<(), SessionError> {
        let max_attempts = if self.preferences().close_database_after_failed_biometric {
            MAX_FAILED_BIOMETRIC_ATTEMPTS
        } else {
            // Biometric retries are unlimited; the platform prompt applies
            // its own hardware lockout.
            u32::MAX
        };
        session.quick_lock(max_attempts)
    }

    /// Fully locks every registered session.
    pub fn lock_all(&self) {
        for session in self.sessions.read().iter() {
            session.lock();
        }
    }

    /// Whether any registered session is unlocked or quick-locked.
    pub fn has_open_sessions(&self) -> bool {
        self.sessions.read().iter().any(|s| !s.is_locked())
    }
}
