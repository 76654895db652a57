//! Resolver/waiter pair for callers that cannot await.
//!
//! Some hosts drive the unlock flow from a thread that must block until a
//! challenge resolves (or a deadline passes). [`challenge_pair`] splits a
//! one-shot value into a [`ChallengeResolver`] for the side that completes
//! the challenge and a [`BlockingChallenge`] for the side that waits.

use std::{sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Why [`BlockingChallenge::wait`] returned without a value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed before the challenge resolved.
    #[error("Timed out waiting for the challenge to resolve")]
    TimedOut,
    /// The resolver was dropped without resolving.
    #[error("The challenge was abandoned")]
    Abandoned,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    cond: Condvar,
}

struct SlotState<T> {
    value: Option<T>,
    abandoned: bool,
}

/// Completes a [`BlockingChallenge`]. Dropping it unresolved wakes the
/// waiter with [`WaitError::Abandoned`].
pub struct ChallengeResolver<T> {
    slot: Arc<Slot<T>>,
    resolved: bool,
}

impl<T> ChallengeResolver<T> {
    /// Resolves the challenge, waking the waiter.
    pub fn resolve(mut self, value: T) {
        self.resolved = true;
        let mut state = self.slot.state.lock();
        state.value = Some(value);
        self.slot.cond.notify_all();
    }
}

impl<T> Drop for ChallengeResolver<T> {
    fn drop(&mut self) {
        if !self.resolved {
            self.slot.state.lock().abandoned = true;
            self.slot.cond.notify_all();
        }
    }
}

/// Blocks a thread until the paired [`ChallengeResolver`] resolves.
pub struct BlockingChallenge<T> {
    slot: Arc<Slot<T>>,
}

impl<T> BlockingChallenge<T> {
    /// Waits up to `timeout` for the value.
    pub fn wait(self, timeout: Duration) -> Result<T, WaitError> {
        let mut state = self.slot.state.lock();
        loop {
            if let Some(value) = state.value.take() {
                return Ok(value);
            }
            if state.abandoned {
                return Err(WaitError::Abandoned);
            }
            if self.slot.cond.wait_for(&mut state, timeout).timed_out() {
                return state.value.take().ok_or(WaitError::TimedOut);
            }
        }
    }
}

/// Creates a linked resolver/waiter pair.
pub fn challenge_pair<T>() -> (ChallengeResolver<T>, BlockingChallenge<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState {
            value: None,
            abandoned: false,
        }),
        cond: Condvar::new(),
    });
    (
        ChallengeResolver {
            slot: Arc::clone(&slot),
            resolved: false,
        },
        BlockingChallenge { slot },
    )
}
