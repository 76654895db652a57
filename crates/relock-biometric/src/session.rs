//! Challenge sessions: pairing a platform prompt with a pending cipher.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use relock_crypto::{AuthorizedCipher, PendingCipher};
use tokio::sync::mpsc;

use crate::{BiometricAvailability, BiometricPrompt, PromptEvent, PromptResponder};

/// The outcome of one turn of an [`OutcomeStream`].
pub enum BiometricOutcome {
    /// The user passed the challenge; the cipher is now usable.
    Succeeded(AuthorizedCipher),
    /// One attempt was rejected. The prompt is still listening.
    Failed,
    /// The prompt ended with a platform error.
    Error(String),
}

struct Shared {
    listening: AtomicBool,
    /// Set immediately before a deliberate [`BiometricPrompt::cancel`], so
    /// the error the platform reports for it can be told apart from a real
    /// one and swallowed.
    self_cancelled: AtomicBool,
    /// Bumped on every start. A stream whose epoch is stale belongs to a
    /// previous challenge and yields nothing.
    epoch: AtomicU64,
}

/// Drives biometric challenges against one platform prompt.
///
/// At most one challenge listens at a time. Starting a challenge takes a
/// [`PendingCipher`] hostage; only a reported success releases it, as an
/// [`AuthorizedCipher`], through the stream.
pub struct BiometricChallengeSession {
    prompt: Arc<dyn BiometricPrompt>,
    shared: Arc<Shared>,
}

impl BiometricChallengeSession {
    /// Creates a session over a platform prompt.
    pub fn new(prompt: Arc<dyn BiometricPrompt>) -> Self {
        Self {
            prompt,
            shared: Arc::new(Shared {
                listening: AtomicBool::new(false),
                self_cancelled: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Reports whether a challenge can currently be presented.
    pub fn availability(&self) -> BiometricAvailability {
        self.prompt.availability()
    }

    /// Presents the prompt and begins a challenge for `pending`.
    ///
    /// Returns `None` without side effects when biometrics are unavailable
    /// or a challenge is already listening.
    pub fn start_listening(&self, pending: PendingCipher) -> Option<OutcomeStream> {
        if self.prompt.availability() != BiometricAvailability::Available {
            tracing::debug!("challenge not started: biometrics unavailable");
            return None;
        }
        if self.shared.listening.swap(true, Ordering::SeqCst) {
            tracing::debug!("challenge not started: already listening");
            return None;
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.self_cancelled.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        self.prompt.authenticate(PromptResponder::new(tx));

        Some(OutcomeStream {
            rx,
            pending: Some(pending),
            shared: Arc::clone(&self.shared),
            epoch,
            done: false,
        })
    }

    /// Deliberately ends a listening challenge.
    ///
    /// The platform reports cancellation as an error event; the flag set
    /// here makes the stream swallow that one event instead of surfacing it.
    pub fn stop_listening(&self) {
        if !self.shared.listening.load(Ordering::SeqCst) {
            return;
        }
        // Ordering matters: the flag must be visible before the platform can
        // deliver the cancellation error.
        self.shared.self_cancelled.store(true, Ordering::SeqCst);
        self.prompt.cancel();
        self.shared.listening.store(false, Ordering::SeqCst);
    }

    /// Whether a challenge is currently listening.
    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }
}

/// Events from one challenge, in the order the platform reported them.
///
/// Yields [`BiometricOutcome::Failed`] for every rejected attempt, then ends
/// with at most one terminal item: success (carrying the authorized cipher)
/// or an error. `None` means the challenge is over; an error caused by a
/// deliberate [`BiometricChallengeSession::stop_listening`] is swallowed and
/// also ends the stream.
pub struct OutcomeStream {
    rx: mpsc::UnboundedReceiver<PromptEvent>,
    pending: Option<PendingCipher>,
    shared: Arc<Shared>,
    epoch: u64,
    done: bool,
}

impl OutcomeStream {
    /// Waits for the next outcome. `None` once the challenge is over.
    pub async fn next(&mut self) -> Option<BiometricOutcome> {
        if self.done || self.is_stale() {
            return None;
        }
        let Some(event) = self.rx.recv().await else {
            // The prompt dropped its responder without a terminal event.
            self.end();
            return None;
        };
        if self.is_stale() {
            return None;
        }
        match event {
            PromptEvent::Succeeded => {
                self.end();
                let pending = self.pending.take()?;
                Some(BiometricOutcome::Succeeded(pending.into_authorized()))
            }
            PromptEvent::Failed => Some(BiometricOutcome::Failed),
            PromptEvent::Error(message) => {
                let deliberate = self.shared.self_cancelled.swap(false, Ordering::SeqCst);
                self.end();
                if deliberate {
                    tracing::debug!("swallowed error from deliberate cancellation");
                    return None;
                }
                Some(BiometricOutcome::Error(message))
            }
        }
    }

    fn is_stale(&self) -> bool {
        self.shared.epoch.load(Ordering::SeqCst) != self.epoch
    }

    fn end(&mut self) {
        self.done = true;
        if !self.is_stale() {
            self.shared.listening.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for OutcomeStream {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use relock_crypto::{GatedKeyStore, SoftwareKeyStore};

    use super::*;
    use crate::testing::ScriptedPrompt;

    fn pending() -> PendingCipher {
        let store = SoftwareKeyStore::new();
        store.create_key("db1").unwrap();
        store.encrypt_cipher("db1").unwrap()
    }

    #[tokio::test]
    async fn test_success_releases_the_cipher_and_ends_the_stream() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let session = BiometricChallengeSession::new(prompt.clone());

        let mut stream = session.start_listening(pending()).unwrap();
        assert!(session.is_listening());

        prompt.push(PromptEvent::Succeeded);
        assert!(matches!(
            stream.next().await,
            Some(BiometricOutcome::Succeeded(_))
        ));
        assert!(!session.is_listening());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_attempts_are_not_terminal() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let session = BiometricChallengeSession::new(prompt.clone());

        let mut stream = session.start_listening(pending()).unwrap();
        prompt.push(PromptEvent::Failed);
        prompt.push(PromptEvent::Failed);
        prompt.push(PromptEvent::Succeeded);

        assert!(matches!(stream.next().await, Some(BiometricOutcome::Failed)));
        assert!(session.is_listening());
        assert!(matches!(stream.next().await, Some(BiometricOutcome::Failed)));
        assert!(matches!(
            stream.next().await,
            Some(BiometricOutcome::Succeeded(_))
        ));
    }

    #[tokio::test]
    async fn test_platform_error_is_surfaced() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let session = BiometricChallengeSession::new(prompt.clone());

        let mut stream = session.start_listening(pending()).unwrap();
        prompt.push(PromptEvent::Error("sensor lockout".into()));

        match stream.next().await {
            Some(BiometricOutcome::Error(message)) => assert_eq!(message, "sensor lockout"),
            _ => panic!("expected a surfaced error"),
        }
        assert!(!session.is_listening());
    }

    #[tokio::test]
    async fn test_deliberate_cancellation_is_swallowed() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let session = BiometricChallengeSession::new(prompt.clone());

        let mut stream = session.start_listening(pending()).unwrap();
        session.stop_listening();

        // ScriptedPrompt::cancel emits the platform's cancellation error.
        assert!(stream.next().await.is_none());
        assert!(!session.is_listening());
    }

    #[tokio::test]
    async fn test_only_one_challenge_listens_at_a_time() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let session = BiometricChallengeSession::new(prompt);

        let _stream = session.start_listening(pending()).unwrap();
        assert!(session.start_listening(pending()).is_none());
    }

    #[tokio::test]
    async fn test_unavailable_biometrics_refuse_to_start() {
        let prompt = Arc::new(ScriptedPrompt::new());
        prompt.set_availability(BiometricAvailability::NotEnrolled);
        let session = BiometricChallengeSession::new(prompt);

        assert!(session.start_listening(pending()).is_none());
        assert!(!session.is_listening());
    }

    #[tokio::test]
    async fn test_stale_stream_yields_nothing_after_restart() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let session = BiometricChallengeSession::new(prompt.clone());

        let mut old = session.start_listening(pending()).unwrap();
        session.stop_listening();
        let _new = session.start_listening(pending()).unwrap();

        prompt.push(PromptEvent::Succeeded);
        assert!(old.next().await.is_none());
        // Dropping the stale stream must not clear the new challenge.
        drop(old);
        assert!(session.is_listening());
    }
}
