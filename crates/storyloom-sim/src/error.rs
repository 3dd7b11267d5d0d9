//! Error taxonomy for the offscreen simulation scheduler.
//!
//! Fatal conditions are scoped to their unit of work: a malformed model
//! output fails one character branch, one cohort, or the whole plan
//! depending on where it happened; a partition violation fails the entire
//! planning step; an incomplete reflection set fails only its cohort.
//! Tool-budget exhaustion and unknown character references are *not* errors
//! -- they become plain-text responses to the model and the session
//! continues.

use storyloom_model::ModelError;

use crate::store::StoreError;
use crate::tracker::TrackerError;

/// Errors that can occur while running an offscreen simulation cycle.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// The model failed to produce a parseable tagged block even after the
    /// corrective retry. Fatal for the named unit of work only.
    #[error("malformed model output in {unit}: {detail}")]
    MalformedModelOutput {
        /// The unit of work that failed (plan, cohort, character branch).
        unit: String,
        /// The final extraction failure.
        detail: String,
    },

    /// A character appeared in more than one cohort even after the
    /// corrective retry. Fatal for the entire planning step: partition
    /// safety cannot be guaranteed, and unsafe parallel execution must not
    /// proceed.
    #[error("cohort partition violation: {detail}")]
    PartitionViolation {
        /// Which names overlapped and where.
        detail: String,
    },

    /// Cohort members were still missing reflections after the nudge retry.
    /// Fatal for that cohort only; sibling cohorts are unaffected.
    #[error("cohort [{cohort}] incomplete: missing reflections from {missing:?}")]
    IncompleteReflections {
        /// The cohort's member listing.
        cohort: String,
        /// Members without a reflection submission.
        missing: Vec<String>,
    },

    /// A model collaborator call failed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A store collaborator call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The tracker oracle failed.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// A spawned branch task panicked or was aborted.
    #[error("branch task failed: {0}")]
    Branch(String),

    /// The shared cancellation signal fired.
    #[error("simulation cancelled")]
    Cancelled,
}
