//! Offscreen simulation scheduler for the Storyloom narrative engine.
//!
//! Between player-visible scenes, the scheduler advances "offscreen"
//! characters so the story world feels alive: the roster builder selects
//! simulation-eligible characters, the cohort planner partitions them into
//! independent interacting groups, cohort moderators drive bounded
//! multi-turn simulations with a machine-checkable completion rule (one
//! reflection per member), the offscreen inference runner performs
//! single-shot narration for everyone else, and all results merge into one
//! shared cycle context without races or duplication.
//!
//! # Modules
//!
//! - [`config`] -- Typed settings loaded from `storyloom.yaml`
//! - [`context`] -- Per-cycle shared state, plan cache, cancellation
//! - [`error`] -- [`SimulationError`] taxonomy
//! - [`knowledge`] -- World-knowledge search collaborator seam
//! - [`merge`] -- Thread-safe append-only merge sink
//! - [`moderator`] -- Cohort moderation state machine
//! - [`offscreen`] -- Parallel single-shot inference branches
//! - [`planner`] -- Cohort planning and partition validation
//! - [`roster`] -- Roster builder
//! - [`scheduler`] -- The per-cycle orchestrator
//! - [`session`] -- Per-character simulation sessions
//! - [`store`] -- Story/event store collaborator seam
//! - [`tracker`] -- Tracker oracle collaborator seam
//!
//! [`SimulationError`]: error::SimulationError

pub mod config;
pub mod context;
pub mod error;
pub mod knowledge;
pub mod merge;
pub mod moderator;
pub mod offscreen;
pub mod planner;
pub mod roster;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod tracker;

pub use config::{ConfigError, SimulationSettings};
pub use context::{CycleContext, PlanCache};
pub use error::SimulationError;
pub use knowledge::{KnowledgeSource, NoKnowledge};
pub use merge::MergeSink;
pub use moderator::{completion_phase, CohortModerator, CohortOutcome, CohortPhase};
pub use offscreen::OffscreenRunner;
pub use planner::{partition_feedback, validate_partition, CohortPlanner, PartitionOffender};
pub use roster::build_roster;
pub use scheduler::{CycleSummary, OffscreenScheduler};
pub use session::{CharacterSession, CohortInput, ParseQueryTypeError, QueryType, SessionDeps};
pub use store::{MemoryStore, StoreError, StoryStore};
pub use tracker::{PassthroughOracle, TrackerError, TrackerOracle, TrackerVerdict};
