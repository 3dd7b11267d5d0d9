//! Story/event store collaborator.
//!
//! The store supplies roster snapshots and unconsumed character events, and
//! is the single final sink for merged character updates and consumed event
//! ids. It never participates in in-memory locking -- the merge sink hands
//! it finished lists in one call at the end of the cycle.
//!
//! [`MemoryStore`] is the in-process implementation used by tests and local
//! development; production deployments implement [`StoryStore`] over their
//! own persistence.

use std::sync::Mutex;

use async_trait::async_trait;

use storyloom_types::{AdventureId, CharacterEvent, CharacterEventId, CharacterUpdate};

/// Errors raised by the store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store was unreachable or rejected the operation.
    #[error("store error: {0}")]
    Backend(String),
}

/// The persistence seam for the scheduler.
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// All unconsumed events addressed to `target` within the adventure.
    async fn unconsumed_events(
        &self,
        adventure: AdventureId,
        target: &str,
    ) -> Result<Vec<CharacterEvent>, StoreError>;

    /// Append freshly emitted cross-character events.
    async fn append_events(&self, events: Vec<CharacterEvent>) -> Result<(), StoreError>;

    /// Write a cycle's merged updates and mark the listed events consumed.
    ///
    /// This is the only write of character state the scheduler performs;
    /// it happens once per cycle, after all branches settle.
    async fn persist_cycle(
        &self,
        updates: Vec<CharacterUpdate>,
        consumed: Vec<CharacterEventId>,
    ) -> Result<(), StoreError>;
}

/// In-memory [`StoryStore`] for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<Vec<CharacterEvent>>,
    saved_updates: Mutex<Vec<CharacterUpdate>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub const fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            saved_updates: Mutex::new(Vec::new()),
        }
    }

    /// Seed the store with pending events.
    pub fn with_events(events: Vec<CharacterEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            saved_updates: Mutex::new(Vec::new()),
        }
    }

    /// All events currently held (consumed and unconsumed).
    pub fn events(&self) -> Vec<CharacterEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// All updates persisted so far.
    pub fn saved_updates(&self) -> Vec<CharacterUpdate> {
        self.saved_updates
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn unconsumed_events(
        &self,
        adventure: AdventureId,
        target: &str,
    ) -> Result<Vec<CharacterEvent>, StoreError> {
        let events = self
            .events
            .lock()
            .map_err(|_| StoreError::Backend(String::from("event lock poisoned")))?;
        Ok(events
            .iter()
            .filter(|e| e.adventure_id == adventure && e.target_character == target && !e.consumed)
            .cloned()
            .collect())
    }

    async fn append_events(&self, new_events: Vec<CharacterEvent>) -> Result<(), StoreError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| StoreError::Backend(String::from("event lock poisoned")))?;
        events.extend(new_events);
        Ok(())
    }

    async fn persist_cycle(
        &self,
        updates: Vec<CharacterUpdate>,
        consumed: Vec<CharacterEventId>,
    ) -> Result<(), StoreError> {
        {
            let mut events = self
                .events
                .lock()
                .map_err(|_| StoreError::Backend(String::from("event lock poisoned")))?;
            for event in events.iter_mut() {
                if consumed.contains(&event.id) {
                    event.consumed = true;
                }
            }
        }
        let mut saved = self
            .saved_updates
            .lock()
            .map_err(|_| StoreError::Backend(String::from("update lock poisoned")))?;
        saved.extend(updates);
        Ok(())
    }
}
