//! Scriptable prompt for driving challenge sessions in tests.

use parking_lot::Mutex;

use crate::{BiometricAvailability, BiometricPrompt, PromptEvent, PromptResponder};

/// A [`BiometricPrompt`] whose events are pushed by the test.
///
/// Events pushed before [`authenticate`][BiometricPrompt::authenticate] are
/// queued and flushed once a responder arrives, so tests can script the
/// whole exchange up front.
#[derive(Default)]
pub struct ScriptedPrompt {
    responder: Mutex<Option<PromptResponder>>,
    queued: Mutex<Vec<PromptEvent>>,
    availability: Mutex<Option<BiometricAvailability>>,
}

impl ScriptedPrompt {
    /// An available prompt with no scripted events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides what [`BiometricPrompt::availability`] reports.
    pub fn set_availability(&self, availability: BiometricAvailability) {
        *self.availability.lock() = Some(availability);
    }

    /// Delivers an event to the active challenge, or queues it for the next
    /// one.
    pub fn push(&self, event: PromptEvent) {
        let mut responder = self.responder.lock();
        match responder.as_ref() {
            Some(active) if !active.is_closed() => deliver(active, event),
            _ => {
                *responder = None;
                self.queued.lock().push(event);
            }
        }
    }

    /// Whether a prompt is currently showing.
    pub fn is_showing(&self) -> bool {
        self.responder.lock().is_some()
    }
}

fn deliver(responder: &PromptResponder, event: PromptEvent) {
    match event {
        PromptEvent::Succeeded => responder.succeeded(),
        PromptEvent::Failed => responder.failed(),
        PromptEvent::Error(message) => responder.error(message),
    }
}

impl BiometricPrompt for ScriptedPrompt {
    fn availability(&self) -> BiometricAvailability {
        self.availability
            .lock()
            .clone()
            .unwrap_or(BiometricAvailability::Available)
    }

    fn authenticate(&self, responder: PromptResponder) {
        for event in self.queued.lock().drain(..) {
            deliver(&responder, event);
        }
        *self.responder.lock() = Some(responder);
    }

    fn cancel(&self) {
        // Platforms report a dismissed prompt as an error event.
        if let Some(responder) = self.responder.lock().take() {
            responder.error("authentication cancelled");
        }
    }
}
