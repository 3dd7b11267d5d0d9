//! Character records and the structured state carried between cycles.
//!
//! A [`CharacterRecord`] is the scheduler's read-side snapshot of one
//! character: identity, free-form profile and physical tracker, relationship
//! notes, indexed memories, and the first-person scene fragments accumulated
//! by earlier simulations. The store collaborator supplies these snapshots at
//! the start of a cycle; the scheduler never mutates them in place -- all
//! changes flow out as [`CharacterUpdate`] values.
//!
//! [`CharacterUpdate`]: crate::update::CharacterUpdate

use serde::{Deserialize, Serialize};

use crate::ids::CharacterId;
use crate::patch::JsonMap;

/// How central a character is to the ongoing story arc.
///
/// Only `ArcImportant` and `Significant` characters are eligible for
/// offscreen simulation; everyone else is background texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceTier {
    /// Drives the arc; gets full multi-turn simulation when offscreen.
    ArcImportant,
    /// Profiled and tracked, but advanced with single-shot inference.
    #[default]
    Significant,
}

impl core::fmt::Display for ImportanceTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ArcImportant => write!(f, "arc_important"),
            Self::Significant => write!(f, "significant"),
        }
    }
}

/// Canonical structured snapshot of a scene's state: when, where, and who.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneTracker {
    /// In-world time (free-form; the story world defines its own calendar).
    #[serde(rename = "time", alias = "DateTime")]
    pub time: String,
    /// Where the scene takes place.
    #[serde(rename = "location", alias = "Location")]
    pub location: String,
    /// Weather during the scene.
    #[serde(rename = "weather", alias = "Weather", default)]
    pub weather: String,
    /// Names of characters present on stage.
    #[serde(rename = "characters_present", alias = "CharactersPresent", default)]
    pub characters_present: Vec<String>,
}

impl SceneTracker {
    /// Whether the named character is present in this scene.
    pub fn contains_character(&self, name: &str) -> bool {
        self.characters_present.iter().any(|c| c == name)
    }
}

/// One relationship the character maintains, as free-form versioned notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipNote {
    /// Name of the other character.
    pub target: String,
    /// One-line summary of the current dynamic.
    #[serde(default)]
    pub dynamic: serde_json::Value,
    /// Open-ended relationship detail (history, tensions, debts).
    #[serde(default)]
    pub data: JsonMap,
    /// Monotonic revision counter; each update appends a higher revision.
    #[serde(default)]
    pub sequence: u32,
}

/// An indexed memory: what the character retains from a stretch of story.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Short summary used for recall.
    pub summary: String,
    /// How strongly this memory weighs on the character (0.0 - 10.0).
    #[serde(default)]
    pub salience: f64,
    /// Scene snapshot the memory is anchored to.
    #[serde(default)]
    pub scene_tracker: Option<SceneTracker>,
    /// Free-form extension data (emotional tone, sensory detail, hooks).
    #[serde(default)]
    pub data: JsonMap,
}

/// A first-person prose fragment from the character's perspective.
///
/// These accumulate per character and seed the identity context of later
/// simulation sessions ("this continues from where you left off").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneFragment {
    /// The narrated prose.
    pub content: String,
    /// Ordering within the character's personal history.
    #[serde(default)]
    pub sequence: u32,
    /// Scene snapshot the fragment belongs to.
    #[serde(default)]
    pub tracker: Option<SceneTracker>,
}

/// Bookkeeping about a character's most recent offscreen simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMeta {
    /// In-world time of the last simulation or inference.
    #[serde(default)]
    pub last_simulated: Option<String>,
    /// Interactions the character intends to pursue in future periods.
    #[serde(default)]
    pub potential_interactions: serde_json::Value,
    /// Set when the character has decided to seek out the protagonist.
    #[serde(default)]
    pub pending_protagonist_interaction: serde_json::Value,
}

/// Read-side snapshot of one character, supplied by the store each cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    /// Stable identifier.
    pub id: CharacterId,
    /// Display name; cohort membership and plan entries refer to this.
    pub name: String,
    /// One-paragraph description.
    #[serde(default)]
    pub description: String,
    /// Arc importance tier.
    pub importance: ImportanceTier,
    /// Free-form psychological profile (goals, fears, routine, voice).
    #[serde(default)]
    pub profile: JsonMap,
    /// Free-form physical tracker (location, condition, inventory).
    #[serde(default)]
    pub tracker: JsonMap,
    /// Relationship notes keyed by revision.
    #[serde(default)]
    pub relationships: Vec<RelationshipNote>,
    /// Indexed memories, oldest first.
    #[serde(default)]
    pub memories: Vec<MemoryRecord>,
    /// First-person scene fragments, oldest first.
    #[serde(default)]
    pub scene_fragments: Vec<SceneFragment>,
    /// Simulation bookkeeping from earlier cycles.
    #[serde(default)]
    pub simulation_meta: Option<SimulationMeta>,
}

impl CharacterRecord {
    /// Current location from the tracker, or `"unknown"` when untracked.
    pub fn location(&self) -> String {
        self.tracker
            .get("location")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_owned()
    }

    /// Highest scene-fragment sequence number recorded so far.
    pub fn last_fragment_sequence(&self) -> u32 {
        self.scene_fragments
            .iter()
            .map(|s| s.sequence)
            .max()
            .unwrap_or(0)
    }
}
