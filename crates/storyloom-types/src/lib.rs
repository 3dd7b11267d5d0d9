//! Shared type definitions for the Storyloom offscreen simulation scheduler.
//!
//! This crate is the single source of truth for the types that flow between
//! the planner, moderators, character sessions, the offscreen inference
//! runner, and the state merge.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for all entity identifiers
//! - [`patch`] -- Dot-notation patching for free-form JSON state
//! - [`character`] -- Character records, trackers, memories, fragments
//! - [`plan`] -- Roster entries and the simulation plan wire format
//! - [`reflection`] -- Reflection and offscreen-inference payloads
//! - [`update`] -- Merged character updates and pending character events

pub mod character;
pub mod ids;
pub mod patch;
pub mod plan;
pub mod reflection;
pub mod update;

// Re-export all public types at crate root for convenience.
pub use character::{
    CharacterRecord, ImportanceTier, MemoryRecord, RelationshipNote, SceneFragment, SceneTracker,
    SimulationMeta,
};
pub use ids::{AdventureId, CharacterEventId, CharacterId, CycleId, SceneId};
pub use patch::{patch_with, JsonMap};
pub use plan::{
    Cohort, InferenceEntry, RosterEntry, SimulationPeriod, SimulationPlan, SkipEntry,
    StandaloneEntry,
};
pub use reflection::{
    CurrentSituation, EmittedCharacterEvent, EmittedWorldEvent, NarratedScene, OffscreenInference,
    ReflectionSubmission, RelationshipUpdate, SceneMemory,
};
pub use update::{CharacterEvent, CharacterUpdate};
