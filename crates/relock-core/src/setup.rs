//! Arming and disarming the fast re-authentication modes.

use std::sync::Arc;

use relock_biometric::{BiometricChallengeSession, BiometricOutcome, OutcomeStream};
use relock_crypto::{encrypt_secret, KeyGeneration};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    context::AppContext,
    error::SetupError,
    record::{self, EncryptedSecretRecord, UnlockMode, QUICK_UNLOCK_MARKER},
    session::VaultSession,
};

/// What [`SetupController::begin_change`] asks of the caller.
pub enum SetupStep {
    /// The change took effect immediately.
    Applied,
    /// A biometric confirmation is running; drive the stream through
    /// [`SetupController::confirm`].
    ConfirmationRequired(OutcomeStream),
}

/// How a confirmation ended.
#[derive(Debug, PartialEq, Eq)]
pub enum SetupOutcome {
    /// The new mode is persisted and active.
    Confirmed,
    /// The change was cancelled or failed; the previous mode is still
    /// active. Carries the platform error message, if there was one.
    Reverted(Option<String>),
}

/// A staged-but-unconfirmed mode change.
///
/// The staged key lives under a fresh key id, so the previous mode's key
/// and record stay intact until the change is confirmed. Cancelling only
/// ever deletes the staged key.
struct PendingChange {
    new_mode: UnlockMode,
    key_id: String,
    generation: KeyGeneration,
    old_key_id: Option<String>,
}

/// Runs the unlock-mode settings flow for one database.
///
/// Modes that cache a secret require a successful biometric confirmation
/// before anything is persisted; a half-completed change (key created, no
/// valid ciphertext) is never marked active.
pub struct SetupController {
    context: Arc<AppContext>,
    session: Arc<VaultSession>,
    biometric: BiometricChallengeSession,
    current_mode: UnlockMode,
    pending: Option<PendingChange>,
}

impl SetupController {
    /// Creates a controller, reading the currently persisted mode.
    pub fn new(context: Arc<AppContext>, session: Arc<VaultSession>) -> Self {
        let biometric = BiometricChallengeSession::new(Arc::clone(context.prompt()));
        let current_mode =
            record::load_unlock_mode(context.credentials(), session.database_id());
        Self {
            context,
            session,
            biometric,
            current_mode,
            pending: None,
        }
    }

    /// The mode currently persisted and shown as selected.
    pub fn current_mode(&self) -> UnlockMode {
        self.current_mode
    }

    /// Starts changing the unlock mode.
    ///
    /// Disabling applies immediately. The other modes stage a fresh gated
    /// key and start a biometric confirmation; nothing is persisted until
    /// [`confirm`][Self::confirm] reports success.
    pub fn begin_change(&mut self, new_mode: UnlockMode) -> Result<SetupStep, SetupError> {
        if self.pending.is_some() {
            return Err(SetupError::ChangeInProgress);
        }

        let repo = self.context.credentials();
        let db = self.session.database_id();

        if new_mode == UnlockMode::Disabled {
            let old_key_id =
                record::load_secret_record(repo, db).map(|record| record.owner_key_id);
            record::clear_secret_record(repo, db);
            record::store_unlock_mode(repo, db, UnlockMode::Disabled);
            if let Some(key_id) = old_key_id {
                self.context.keystore().delete_key(&key_id)?;
            }
            self.current_mode = UnlockMode::Disabled;
            tracing::info!(database = %db, "fast re-authentication disabled");
            return Ok(SetupStep::Applied);
        }

        // Full-unlock caches the master password; without it in memory
        // there is nothing to cache.
        if new_mode == UnlockMode::FullUnlock && self.session.master_password().is_none() {
            return Err(SetupError::SessionLocked);
        }

        let old_key_id = record::load_secret_record(repo, db).map(|record| record.owner_key_id);
        let key_id = Uuid::new_v4().to_string();
        let generation = self.context.keystore().create_key(&key_id)?;
        let pending_cipher = match self.context.keystore().encrypt_cipher(&key_id) {
            Ok(cipher) => cipher,
            Err(error) => {
                let _ = self.context.keystore().delete_key(&key_id);
                return Err(error.into());
            }
        };

        let Some(stream) = self.biometric.start_listening(pending_cipher) else {
            let _ = self.context.keystore().delete_key(&key_id);
            return Err(SetupError::BiometricUnavailable);
        };

        self.pending = Some(PendingChange {
            new_mode,
            key_id,
            generation,
            old_key_id,
        });
        Ok(SetupStep::ConfirmationRequired(stream))
    }

    /// Drives a confirmation to its end.
    ///
    /// Rejected readings keep the prompt listening. Success persists the
    /// new mode and record; any other ending deletes the staged key and
    /// leaves the previous mode active.
    pub async fn confirm(&mut self, mut outcomes: OutcomeStream) -> Result<SetupOutcome, SetupError> {
        loop {
            match outcomes.next().await {
                Some(BiometricOutcome::Failed) => continue,
                Some(BiometricOutcome::Succeeded(cipher)) => {
                    let Some(change) = self.pending.take() else {
                        return Ok(SetupOutcome::Reverted(None));
                    };
                    let secret: Zeroizing<String> = match change.new_mode {
                        UnlockMode::QuickUnlock => {
                            Zeroizing::new(QUICK_UNLOCK_MARKER.to_string())
                        }
                        UnlockMode::FullUnlock => match self.session.master_password() {
                            Some(password) => password,
                            None => {
                                self.discard(&change.key_id);
                                return Err(SetupError::SessionLocked);
                            }
                        },
                        UnlockMode::Disabled => {
                            self.discard(&change.key_id);
                            return Ok(SetupOutcome::Reverted(None));
                        }
                    };

                    let encrypted = match encrypt_secret(cipher, &secret) {
                        Ok(encrypted) => encrypted,
                        Err(error) => {
                            self.discard(&change.key_id);
                            return Err(error.into());
                        }
                    };
                    debug_assert_eq!(encrypted.generation, change.generation);

                    let repo = self.context.credentials();
                    let db = self.session.database_id();
                    let record =
                        EncryptedSecretRecord::new(encrypted, change.key_id.clone());
                    record::store_secret_record(repo, db, &record);
                    record::store_unlock_mode(repo, db, change.new_mode);
                    if let Some(old_key_id) = change.old_key_id {
                        if old_key_id != change.key_id {
                            let _ = self.context.keystore().delete_key(&old_key_id);
                        }
                    }
                    self.current_mode = change.new_mode;
                    tracing::info!(database = %db, mode = ?change.new_mode, "unlock mode armed");
                    return Ok(SetupOutcome::Confirmed);
                }
                Some(BiometricOutcome::Error(message)) => {
                    self.revert();
                    return Ok(SetupOutcome::Reverted(Some(message)));
                }
                None => {
                    self.revert();
                    return Ok(SetupOutcome::Reverted(None));
                }
            }
        }
    }

    /// Cancels a confirmation in progress, reverting to the previous mode.
    pub fn cancel(&mut self) {
        self.biometric.stop_listening();
        self.revert();
    }

    fn revert(&mut self) {
        if let Some(change) = self.pending.take() {
            self.discard(&change.key_id);
            tracing::debug!(mode = ?self.current_mode, "mode change reverted");
        }
    }

    fn discard(&self, staged_key_id: &str) {
        if let Err(error) = self.context.keystore().delete_key(staged_key_id) {
            tracing::warn!(%error, "failed to delete staged key");
        }
    }
}

impl Drop for SetupController {
    fn drop(&mut self) {
        self.biometric.stop_listening();
        self.revert();
    }
}
