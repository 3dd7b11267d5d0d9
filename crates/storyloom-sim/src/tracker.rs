//! Tracker oracle collaborator.
//!
//! After an offscreen branch narrates a character's time, the scheduler
//! delegates to an external oracle to compute the authoritative post-run
//! tracker and the alive/dead determination from the before/after state and
//! the narrated prose. The oracle is external (typically another model
//! agent); [`PassthroughOracle`] accepts the narrated tracker unchanged.

use async_trait::async_trait;

use storyloom_types::{CharacterRecord, JsonMap};

/// Errors raised by the tracker oracle.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The oracle was unreachable or returned an unusable verdict.
    #[error("tracker oracle error: {0}")]
    Oracle(String),
}

/// The oracle's authoritative determination for one character.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerVerdict {
    /// Canonical post-run tracker.
    pub tracker: JsonMap,
    /// Whether the character survived the period.
    pub alive: bool,
}

/// The authoritative-tracker seam.
#[async_trait]
pub trait TrackerOracle: Send + Sync {
    /// Compute the canonical tracker and alive/dead flag.
    ///
    /// `before` is the tracker at the start of the period, `proposed` the
    /// tracker after applying the narration's deltas, and `narrative` the
    /// prose the character's branch produced.
    async fn finalize(
        &self,
        character: &CharacterRecord,
        before: &JsonMap,
        proposed: &JsonMap,
        narrative: &str,
    ) -> Result<TrackerVerdict, TrackerError>;
}

/// Oracle that accepts the narrated tracker unchanged and always reports
/// the character alive. Used in tests and when no oracle is deployed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughOracle;

#[async_trait]
impl TrackerOracle for PassthroughOracle {
    async fn finalize(
        &self,
        _character: &CharacterRecord,
        _before: &JsonMap,
        proposed: &JsonMap,
        _narrative: &str,
    ) -> Result<TrackerVerdict, TrackerError> {
        Ok(TrackerVerdict {
            tracker: proposed.clone(),
            alive: true,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_returns_proposed_tracker_alive() {
        let mut proposed = JsonMap::new();
        proposed.insert(String::from("location"), serde_json::json!("Mill Road"));

        let verdict = PassthroughOracle
            .finalize(
                &CharacterRecord::default(),
                &JsonMap::new(),
                &proposed,
                "She walked to the mill.",
            )
            .await
            .unwrap();

        assert!(verdict.alive);
        assert_eq!(verdict.tracker, proposed);
    }
}
