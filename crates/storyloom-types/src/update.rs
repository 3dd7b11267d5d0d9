//! Output units of a simulation cycle: character updates and the pending
//! cross-character events they consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::character::{MemoryRecord, RelationshipNote, SceneFragment, SimulationMeta};
use crate::ids::{AdventureId, CharacterEventId, CharacterId};
use crate::patch::JsonMap;

/// One character's merged result for a cycle.
///
/// Appended to the shared merge sink exactly once per character and never
/// mutated afterwards; the store collaborator is the final sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterUpdate {
    /// Stable character identifier.
    pub character_id: CharacterId,
    /// Character name (merge results are keyed by character).
    pub name: String,
    /// Profile after applying the simulation's deltas.
    #[serde(default)]
    pub profile: JsonMap,
    /// Tracker after applying the simulation's deltas (authoritative when a
    /// tracker oracle ran).
    #[serde(default)]
    pub tracker: JsonMap,
    /// Whether the character is still alive after the period.
    #[serde(default = "default_alive")]
    pub alive: bool,
    /// New memory records produced this cycle.
    #[serde(default)]
    pub memories: Vec<MemoryRecord>,
    /// New first-person scene fragments produced this cycle.
    #[serde(default)]
    pub scene_fragments: Vec<SceneFragment>,
    /// Relationship revisions produced this cycle.
    #[serde(default)]
    pub relationships: Vec<RelationshipNote>,
    /// IDs of the pending events this character's branch consumed.
    #[serde(default)]
    pub consumed_event_ids: Vec<CharacterEventId>,
    /// Refreshed simulation bookkeeping.
    #[serde(default)]
    pub simulation_meta: Option<SimulationMeta>,
}

const fn default_alive() -> bool {
    true
}

/// A pending cross-character notification.
///
/// Written when a simulated character's actions affect another profiled
/// character; read unconsumed-only per cycle; marked consumed only after the
/// owning character's branch completes successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterEvent {
    /// Stable event identifier.
    pub id: CharacterEventId,
    /// Adventure the event belongs to.
    pub adventure_id: AdventureId,
    /// Name of the character the event is addressed to.
    pub target_character: String,
    /// Name of the character whose actions caused it.
    pub source_character: String,
    /// In-world time when it happened.
    pub time: String,
    /// What happened, from the target's perspective.
    pub event: String,
    /// The source character's read on how it landed.
    #[serde(default)]
    pub source_read: String,
    /// Whether a branch has already consumed this event.
    #[serde(default)]
    pub consumed: bool,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
}

impl CharacterEvent {
    /// Build an unconsumed event addressed to `target` from `source`.
    pub fn new(
        adventure_id: AdventureId,
        target: impl Into<String>,
        source: impl Into<String>,
        time: impl Into<String>,
        event: impl Into<String>,
        source_read: impl Into<String>,
    ) -> Self {
        Self {
            id: CharacterEventId::new(),
            adventure_id,
            target_character: target.into(),
            source_character: source.into(),
            time: time.into(),
            event: event.into(),
            source_read: source_read.into(),
            consumed: false,
            created_at: Utc::now(),
        }
    }
}
