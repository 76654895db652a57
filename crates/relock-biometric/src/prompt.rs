//! The contract between the SDK and a platform biometric prompt.

use tokio::sync::mpsc;

/// Whether a biometric challenge can be presented right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiometricAvailability {
    /// Hardware present, at least one credential enrolled.
    Available,
    /// The device has no biometric hardware.
    NoHardware,
    /// Hardware present but no biometric credential is enrolled.
    NotEnrolled,
    /// Hardware present but temporarily unusable (e.g. lockout).
    Unavailable(String),
}

/// An event reported by the platform prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptEvent {
    /// The user passed the challenge. Terminal.
    Succeeded,
    /// A single attempt was rejected (e.g. unrecognized finger). The prompt
    /// keeps listening; not terminal.
    Failed,
    /// The prompt ended with a platform error message. Terminal.
    Error(String),
}

/// Handle a [`BiometricPrompt`] implementation uses to report events back
/// into the active [`OutcomeStream`][crate::OutcomeStream].
///
/// Cloneable so the platform side can hand it to whatever callback or
/// listener object its API requires. Reports after the terminal event, or
/// after the stream is dropped, are silently discarded.
#[derive(Clone)]
pub struct PromptResponder {
    tx: mpsc::UnboundedSender<PromptEvent>,
}

impl PromptResponder {
    pub(crate) fn new(tx: mpsc::UnboundedSender<PromptEvent>) -> Self {
        Self { tx }
    }

    /// Reports a successful challenge.
    pub fn succeeded(&self) {
        self.send(PromptEvent::Succeeded);
    }

    /// Reports a rejected attempt. The prompt should keep listening.
    pub fn failed(&self) {
        self.send(PromptEvent::Failed);
    }

    /// Reports a terminal platform error.
    pub fn error(&self, message: impl Into<String>) {
        self.send(PromptEvent::Error(message.into()));
    }

    /// Whether the challenge this responder reports into has ended.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: PromptEvent) {
        // A closed channel means the stream was dropped or superseded; the
        // late event has nowhere meaningful to go.
        if self.tx.send(event).is_err() {
            tracing::debug!("prompt event arrived after the challenge ended");
        }
    }
}

/// A platform biometric prompt.
///
/// Implementations wrap the OS prompt API. They must deliver events through
/// the [`PromptResponder`] given to [`authenticate`][Self::authenticate]:
/// one terminal event (success or error), with any number of non-terminal
/// failures before it. [`cancel`][Self::cancel] must cause the platform to
/// report a terminal error if a prompt is showing, and do nothing otherwise.
pub trait BiometricPrompt: Send + Sync {
    /// Reports whether a challenge can currently be presented.
    fn availability(&self) -> BiometricAvailability;

    /// Presents the prompt and starts listening for the user.
    fn authenticate(&self, responder: PromptResponder);

    /// Dismisses a showing prompt.
    fn cancel(&self);
}
