//! Reflection and inference payloads produced by character simulations.
//!
//! A [`ReflectionSubmission`] is the one-time structured completion payload a
//! character contributes per simulation session: narrated scenes with memory
//! indexing, profile and tracker deltas, relationship updates, and the
//! cross-character events their actions caused. [`OffscreenInference`] is the
//! lighter single-shot equivalent for characters who did not need a full
//! session. Field names follow the model-facing wire format.

use serde::{Deserialize, Serialize};

use crate::character::SceneTracker;
use crate::patch::JsonMap;

/// Memory index entry attached to a narrated scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneMemory {
    /// Short summary used for recall.
    pub summary: String,
    /// How strongly the scene weighs on the character (0.0 - 10.0).
    #[serde(default)]
    pub salience: f64,
    /// Free-form extension data (emotional tone, hooks).
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// One first-person scene narrated during a simulation period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarratedScene {
    /// Time, location, weather, and characters present for the scene.
    pub story_tracker: SceneTracker,
    /// First-person prose from the character's perspective.
    pub narrative: String,
    /// Memory index entry for this scene.
    pub memory: SceneMemory,
}

/// A relationship delta reported by a simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipUpdate {
    /// Name of the other character.
    pub name: String,
    /// Updated one-line dynamic.
    #[serde(default)]
    pub dynamic: serde_json::Value,
    /// Open-ended detail to fold into the relationship data.
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// A world event caused by the character's actions that others could
/// discover.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedWorldEvent {
    /// In-world time of the event.
    pub when: String,
    /// Where it happened.
    #[serde(rename = "where")]
    pub location: String,
    /// What happened.
    pub event: String,
}

/// An event logged when the simulated character affected another profiled
/// character. These feed offscreen inference for the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmittedCharacterEvent {
    /// Name of the affected character.
    pub character: String,
    /// In-world time when it happened.
    pub time: String,
    /// What happened, from the target's perspective.
    pub event: String,
    /// The simulating character's read on how it landed.
    #[serde(default)]
    pub my_read: String,
}

/// The one-time structured completion payload of a simulation session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionSubmission {
    /// Scenes narrated during the period, oldest first.
    #[serde(default)]
    pub scenes: Vec<NarratedScene>,
    /// Relationship deltas from the period.
    #[serde(default)]
    pub relationship_updates: Vec<RelationshipUpdate>,
    /// Profile deltas (dot-notation keys allowed).
    #[serde(default)]
    pub profile_updates: JsonMap,
    /// Tracker deltas (dot-notation keys allowed).
    #[serde(default)]
    pub tracker_updates: JsonMap,
    /// Interactions to pursue in future periods.
    #[serde(default)]
    pub potential_interactions: serde_json::Value,
    /// Set when the character decided to seek out the protagonist.
    #[serde(default)]
    pub pending_protagonist_interaction: serde_json::Value,
    /// World events the character's actions caused.
    #[serde(default)]
    pub world_events_emitted: Vec<EmittedWorldEvent>,
    /// Cross-character events to route to affected characters.
    #[serde(default)]
    pub character_events: Vec<EmittedCharacterEvent>,
}

/// The character's situation at the end of an offscreen inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentSituation {
    /// Where they are right now.
    pub location: String,
    /// What they are doing when found or contacted.
    #[serde(default)]
    pub activity: String,
    /// Context for whoever is about to interact with them.
    #[serde(default)]
    pub ready_for_interaction: String,
}

/// Output of a single-shot offscreen inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffscreenInference {
    /// Zero or more narrated time-slices.
    #[serde(default)]
    pub scenes: Vec<NarratedScene>,
    /// Where the character is and what they are doing now.
    pub current_situation: CurrentSituation,
    /// Profile deltas (dot-notation keys allowed).
    #[serde(default)]
    pub profile_updates: JsonMap,
    /// Tracker deltas (dot-notation keys allowed).
    #[serde(default)]
    pub tracker_updates: JsonMap,
}
