#![doc = include_str!("../README.md")]

pub mod blocking;
mod prompt;
pub use prompt::{BiometricAvailability, BiometricPrompt, PromptEvent, PromptResponder};
mod session;
pub use session::{BiometricChallengeSession, BiometricOutcome, OutcomeStream};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
