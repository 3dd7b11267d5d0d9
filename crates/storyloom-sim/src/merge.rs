//! Thread-safe aggregation of character updates into the shared cycle
//! result.
//!
//! Many concurrent producers (cohort moderations, offscreen branches) append
//! to one ordered collection. The sink is a mutex-guarded append-only
//! structure; the critical section covers only the append itself and never
//! spans a suspending call, so the lock is never held across model I/O.

use std::sync::Mutex;

use storyloom_types::{CharacterEventId, CharacterUpdate};

/// The lists accumulated during one cycle.
#[derive(Debug, Default)]
struct MergeState {
    /// Merged character updates, in completion order.
    updates: Vec<CharacterUpdate>,
    /// IDs of the pending events consumed by merged branches.
    consumed_events: Vec<CharacterEventId>,
}

/// Append-only sink for a cycle's character updates and consumed event ids.
#[derive(Debug, Default)]
pub struct MergeSink {
    inner: Mutex<MergeState>,
}

impl MergeSink {
    /// Create an empty sink.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(MergeState {
                updates: Vec::new(),
                consumed_events: Vec::new(),
            }),
        }
    }

    /// Append one character update (and its consumed event ids).
    ///
    /// One short critical section; the update is never mutated afterwards.
    pub fn push(&self, update: CharacterUpdate) {
        if let Ok(mut state) = self.inner.lock() {
            state
                .consumed_events
                .extend(update.consumed_event_ids.iter().copied());
            state.updates.push(update);
        }
    }

    /// Whether the named character already has a merged update this cycle.
    ///
    /// Backs the no-double-update invariant: a character with an update must
    /// never also be submitted to the offscreen inference runner.
    pub fn has_update(&self, name: &str) -> bool {
        self.inner
            .lock()
            .map(|state| state.updates.iter().any(|u| u.name == name))
            .unwrap_or(false)
    }

    /// Number of merged updates so far.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|state| state.updates.len()).unwrap_or(0)
    }

    /// Whether nothing has been merged yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone out the merged lists for the final store write.
    pub fn snapshot(&self) -> (Vec<CharacterUpdate>, Vec<CharacterEventId>) {
        self.inner
            .lock()
            .map(|state| (state.updates.clone(), state.consumed_events.clone()))
            .unwrap_or_default()
    }
}
