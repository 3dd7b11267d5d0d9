//! Simulation planning types: the roster fed to the planner and the plan it
//! returns.
//!
//! The plan is the planner's JSON contract with the narrative model: a
//! `simulation_needed` verdict, the in-world period to simulate, cohorts of
//! interacting characters, standalone entries, characters to skip, and
//! significant characters that only need single-shot inference. Field names
//! mirror the model-facing wire format (snake_case JSON inside a
//! `<simulation_plan>` tag).

use serde::{Deserialize, Serialize};

use crate::character::ImportanceTier;
use crate::patch::JsonMap;

/// One character's row in the planning roster.
///
/// Immutable snapshot, rebuilt from character records each planning cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Character name (plan entries refer to this).
    pub name: String,
    /// Arc importance tier.
    pub importance: ImportanceTier,
    /// Current location from the character tracker.
    pub location: String,
    /// In-world time of the last simulation, if any.
    #[serde(default)]
    pub last_simulated: Option<String>,
    /// Compact summary of current goals.
    #[serde(default)]
    pub goals_summary: Option<String>,
    /// Compact summary of daily routine.
    #[serde(default)]
    pub routine_summary: Option<String>,
    /// Names of the character's key relationships.
    #[serde(default)]
    pub key_relationships: Vec<String>,
    /// Formatted relationship notes for the planner prompt.
    #[serde(default)]
    pub relationship_notes: Option<String>,
    /// Intent the character flagged in an earlier cycle (seek the
    /// protagonist, pursue another character). Drives `check_intent`.
    #[serde(default)]
    pub pending_intent: serde_json::Value,
}

/// The in-world time window one cycle simulates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationPeriod {
    /// Start of the window, when the model states one.
    #[serde(default)]
    pub from: Option<String>,
    /// End of the window ("simulate to").
    pub to: String,
    /// Free-form extension data the model attaches to the period.
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// A non-empty, ordered set of characters simulated together because they
/// can interact during the period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    /// Member character names, in the planner's order.
    pub characters: Vec<String>,
    /// Extension data: known interactions confirmed by intent checks.
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// An arc-important character simulated alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandaloneEntry {
    /// Character name.
    pub character: String,
    /// Extension data (planner rationale, expected focus).
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// A character the planner decided not to simulate this cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkipEntry {
    /// Character name.
    pub character: String,
    /// Why they were skipped (`present_in_scene`, `recently_simulated`).
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// A significant character advanced with single-shot offscreen inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceEntry {
    /// Character name.
    pub character: String,
    /// Extension data (why they are likely to appear next scene).
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// The planner's output for one generation cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationPlan {
    /// False when no offscreen activity is warranted this cycle.
    #[serde(default)]
    pub simulation_needed: bool,
    /// Reason given when `simulation_needed` is false.
    #[serde(default)]
    pub reason: Option<String>,
    /// The in-world window to simulate.
    #[serde(default)]
    pub simulation_period: Option<SimulationPeriod>,
    /// Groups of interacting characters to simulate together.
    #[serde(default)]
    pub cohorts: Vec<Cohort>,
    /// Arc-important characters to simulate alone.
    #[serde(default)]
    pub standalone: Vec<StandaloneEntry>,
    /// Characters deliberately not simulated this cycle.
    #[serde(default)]
    pub skip: Vec<SkipEntry>,
    /// Significant characters that only need single-shot inference.
    #[serde(default, alias = "significant_for_inference")]
    pub inference_only: Vec<InferenceEntry>,
}

impl SimulationPlan {
    /// Every character name appearing in any cohort, with repeats.
    pub fn cohort_members(&self) -> impl Iterator<Item = &str> {
        self.cohorts
            .iter()
            .flat_map(|c| c.characters.iter().map(String::as_str))
    }

    /// Whether the named character belongs to any cohort of this plan.
    pub fn is_in_cohort(&self, name: &str) -> bool {
        self.cohort_members().any(|m| m.eq_ignore_ascii_case(name))
    }
}
