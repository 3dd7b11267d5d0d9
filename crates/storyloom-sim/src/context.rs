//! Shared per-cycle context: scene snapshot, character records, the plan
//! cache, the merge sink, and the cancellation signal.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use storyloom_types::{AdventureId, CharacterRecord, CycleId, SceneTracker, SimulationPlan};

use crate::error::SimulationError;
use crate::merge::MergeSink;

/// Idempotent-computation cache for the simulation plan, keyed by
/// generation-cycle identity.
///
/// Planning is idempotent: re-entering a cycle that already has a plan must
/// perform zero additional model calls and return the identical plan. The
/// key makes staleness explicit -- a plan cached for another cycle is never
/// returned.
#[derive(Debug, Default)]
pub struct PlanCache {
    inner: Mutex<Option<(CycleId, SimulationPlan)>>,
}

impl PlanCache {
    /// Create an empty cache.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// The cached plan for the given cycle, if one was stored.
    pub fn get(&self, cycle: CycleId) -> Option<SimulationPlan> {
        self.inner
            .lock()
            .ok()
            .and_then(|guard| match guard.as_ref() {
                Some((cached_cycle, plan)) if *cached_cycle == cycle => Some(plan.clone()),
                _ => None,
            })
    }

    /// Store the plan computed for the given cycle.
    pub fn store(&self, cycle: CycleId, plan: &SimulationPlan) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some((cycle, plan.clone()));
        }
    }
}

/// Everything one generation cycle shares across its parallel branches.
#[derive(Debug)]
pub struct CycleContext {
    /// The adventure being played.
    pub adventure_id: AdventureId,
    /// Identity of this generation cycle.
    pub cycle_id: CycleId,
    /// Scene tracker of the scene that just ended.
    pub scene_tracker: SceneTracker,
    /// Read-side snapshots of all profiled characters.
    pub characters: Vec<CharacterRecord>,
    /// Active world momentum (events in motion), if tracked.
    pub world_momentum: Option<serde_json::Value>,
    /// Writer guidance on where the story is heading, if any.
    pub narrative_direction: Option<serde_json::Value>,
    /// Cycle-keyed plan cache.
    pub plan_cache: PlanCache,
    /// Shared append-only sink for merged results.
    pub merge: MergeSink,
    /// Shared cancellation signal, honored at call boundaries.
    pub cancel: CancellationToken,
}

impl CycleContext {
    /// Build a context for one cycle.
    pub fn new(
        adventure_id: AdventureId,
        cycle_id: CycleId,
        scene_tracker: SceneTracker,
        characters: Vec<CharacterRecord>,
    ) -> Self {
        Self {
            adventure_id,
            cycle_id,
            scene_tracker,
            characters,
            world_momentum: None,
            narrative_direction: None,
            plan_cache: PlanCache::new(),
            merge: MergeSink::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Look up a character snapshot by name (case-insensitive, matching the
    /// model's loose spelling of names).
    pub fn character(&self, name: &str) -> Option<&CharacterRecord> {
        self.characters
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Fail fast when the shared cancellation signal has fired.
    pub fn ensure_live(&self) -> Result<(), SimulationError> {
        if self.cancel.is_cancelled() {
            Err(SimulationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use storyloom_types::ImportanceTier;

    use super::*;

    fn make_context() -> CycleContext {
        let alice = CharacterRecord {
            name: String::from("Alice"),
            importance: ImportanceTier::ArcImportant,
            ..CharacterRecord::default()
        };
        CycleContext::new(
            AdventureId::new(),
            CycleId::new(),
            SceneTracker::default(),
            vec![alice],
        )
    }

    #[test]
    fn character_lookup_is_case_insensitive() {
        let ctx = make_context();
        assert!(ctx.character("alice").is_some());
        assert!(ctx.character("ALICE").is_some());
        assert!(ctx.character("Bob").is_none());
    }

    #[test]
    fn plan_cache_returns_stored_plan_for_same_cycle() {
        let cache = PlanCache::new();
        let cycle = CycleId::new();
        let plan = SimulationPlan {
            simulation_needed: true,
            ..SimulationPlan::default()
        };

        assert!(cache.get(cycle).is_none());
        cache.store(cycle, &plan);
        assert_eq!(cache.get(cycle), Some(plan));
    }

    #[test]
    fn plan_cache_misses_for_other_cycle() {
        let cache = PlanCache::new();
        let plan = SimulationPlan::default();
        cache.store(CycleId::new(), &plan);
        assert!(cache.get(CycleId::new()).is_none());
    }

    #[test]
    fn ensure_live_respects_cancellation() {
        let ctx = make_context();
        assert!(ctx.ensure_live().is_ok());
        ctx.cancel.cancel();
        assert!(matches!(
            ctx.ensure_live(),
            Err(SimulationError::Cancelled)
        ));
    }
}
