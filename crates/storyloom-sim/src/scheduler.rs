//! The offscreen simulation scheduler: one entry point per generation
//! cycle.
//!
//! Flow: roster builder -> cohort planner -> {per cohort: moderator -> N
//! character sessions} and {per standalone character: offscreen inference},
//! all converging into the shared merge sink, which is written to the store
//! in one call after every branch settles.
//!
//! Partial-failure policy: branches that merged before a sibling faulted
//! keep their state and are persisted; the cycle still returns the first
//! branch error so the enclosing generation request fails. Re-running a
//! merged branch would duplicate memories and event consumption, so the
//! merged results are never discarded.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use storyloom_model::{ModelClient, PromptEngine};
use storyloom_types::{SimulationPeriod, SimulationPlan};

use crate::config::SimulationSettings;
use crate::context::CycleContext;
use crate::error::SimulationError;
use crate::knowledge::KnowledgeSource;
use crate::moderator::{CohortModerator, CohortOutcome};
use crate::offscreen::OffscreenRunner;
use crate::planner::CohortPlanner;
use crate::roster::build_roster;
use crate::store::StoryStore;
use crate::tracker::TrackerOracle;

/// What one cycle accomplished.
#[derive(Debug, Default)]
pub struct CycleSummary {
    /// The plan the cycle executed.
    pub plan: SimulationPlan,
    /// Character updates merged and persisted.
    pub updates_merged: usize,
    /// Pending events marked consumed.
    pub events_consumed: usize,
    /// Cohorts that reached `Completed`.
    pub cohorts_completed: usize,
    /// Cohorts that failed.
    pub cohorts_failed: usize,
}

/// The scheduler facade: owns the planner, moderator, and inference runner.
pub struct OffscreenScheduler {
    planner: CohortPlanner,
    moderator: Arc<CohortModerator>,
    offscreen: OffscreenRunner,
    store: Arc<dyn StoryStore>,
}

impl OffscreenScheduler {
    /// Wire a scheduler from its collaborators.
    pub fn new(
        model: Arc<ModelClient>,
        prompts: Arc<PromptEngine>,
        knowledge: Arc<dyn KnowledgeSource>,
        oracle: Arc<dyn TrackerOracle>,
        store: Arc<dyn StoryStore>,
        settings: SimulationSettings,
    ) -> Self {
        Self {
            planner: CohortPlanner::new(
                Arc::clone(&model),
                Arc::clone(&prompts),
                settings.clone(),
            ),
            moderator: Arc::new(CohortModerator::new(
                Arc::clone(&model),
                Arc::clone(&prompts),
                knowledge,
                settings.clone(),
            )),
            offscreen: OffscreenRunner::new(
                model,
                prompts,
                oracle,
                Arc::clone(&store),
                settings,
            ),
            store,
        }
    }

    /// Run one complete offscreen simulation cycle.
    ///
    /// Planning is idempotent (cached per cycle); execution is not -- a
    /// successfully merged branch is never re-executed, and re-invoking the
    /// cycle after a partial failure resumes with the cached plan and the
    /// merge sink's no-double-update guard.
    ///
    /// # Errors
    ///
    /// Planning failures fail the cycle before any branch starts. Branch
    /// failures surface as the first error after all branches settle;
    /// already-merged updates are persisted first.
    #[allow(clippy::too_many_lines)]
    pub async fn run_cycle(
        &self,
        ctx: &Arc<CycleContext>,
    ) -> Result<CycleSummary, SimulationError> {
        let roster = build_roster(&ctx.characters, &ctx.scene_tracker);
        if roster.is_empty() {
            info!("no simulation-eligible characters offscreen, skipping cycle");
            return Ok(CycleSummary::default());
        }

        let plan = self.planner.plan(ctx, &roster).await?;
        if !plan.simulation_needed {
            info!(
                reason = plan.reason.as_deref().unwrap_or("no reason provided"),
                "planner concluded no simulation is needed"
            );
            return Ok(CycleSummary {
                plan,
                ..CycleSummary::default()
            });
        }

        let period = plan.simulation_period.clone().unwrap_or_else(|| {
            warn!("plan carried no simulation period, defaulting to the scene time");
            SimulationPeriod {
                to: ctx.scene_tracker.time.clone(),
                ..SimulationPeriod::default()
            }
        });

        // Cohort moderations: fully parallel, safe under the partition
        // invariant the planner validated.
        let mut cohort_tasks: JoinSet<Result<CohortOutcome, SimulationError>> = JoinSet::new();
        for cohort in plan.cohorts.clone() {
            let moderator = Arc::clone(&self.moderator);
            let task_ctx = Arc::clone(ctx);
            let task_period = period.clone();
            cohort_tasks.spawn(async move {
                moderator.run(&task_ctx, &cohort, &task_period).await
            });
        }

        let offscreen_names = offscreen_candidates(ctx, &plan);

        let cohorts = async {
            let mut completed: usize = 0;
            let mut failed: usize = 0;
            let mut first_error: Option<SimulationError> = None;
            while let Some(joined) = cohort_tasks.join_next().await {
                match joined {
                    Ok(Ok(outcome)) => {
                        for update in outcome.updates {
                            ctx.merge.push(update);
                        }
                        if !outcome.emitted_events.is_empty() {
                            if let Err(e) =
                                self.store.append_events(outcome.emitted_events).await
                            {
                                first_error.get_or_insert(SimulationError::Store(e));
                            }
                        }
                        completed = completed.saturating_add(1);
                        info!(cohort = %outcome.label, "cohort merged");
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "cohort moderation failed");
                        failed = failed.saturating_add(1);
                        first_error.get_or_insert(e);
                    }
                    Err(e) => {
                        failed = failed.saturating_add(1);
                        first_error.get_or_insert(SimulationError::Branch(e.to_string()));
                    }
                }
            }
            (completed, failed, first_error)
        };

        let ((cohorts_completed, cohorts_failed, cohort_error), offscreen_result) =
            tokio::join!(cohorts, self.offscreen.run_all(ctx, &offscreen_names, &period));

        // Keep-partial policy: persist whatever merged before surfacing the
        // first branch failure.
        let (updates, consumed) = ctx.merge.snapshot();
        let updates_merged = updates.len();
        let events_consumed = consumed.len();
        self.store.persist_cycle(updates, consumed).await?;

        if let Some(e) = cohort_error {
            return Err(e);
        }
        offscreen_result?;

        info!(
            updates = updates_merged,
            consumed = events_consumed,
            cohorts = cohorts_completed,
            "offscreen simulation cycle persisted"
        );

        Ok(CycleSummary {
            plan,
            updates_merged,
            events_consumed,
            cohorts_completed,
            cohorts_failed,
        })
    }
}

/// Resolve which characters go through offscreen inference this cycle.
///
/// Standalone and inference-only entries both run the single-shot path.
/// Names already covered by a cohort are dropped (no-double-update), as are
/// duplicates and characters standing in the scene.
fn offscreen_candidates(ctx: &CycleContext, plan: &SimulationPlan) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let candidates = plan
        .standalone
        .iter()
        .map(|s| s.character.clone())
        .chain(plan.inference_only.iter().map(|s| s.character.clone()));

    for name in candidates {
        if plan.is_in_cohort(&name) {
            warn!(
                character = %name,
                "character is in a cohort, skipping duplicate inference entry"
            );
            continue;
        }
        if ctx.scene_tracker.contains_character(&name) {
            warn!(
                character = %name,
                "character is present in the scene, skipping inference entry"
            );
            continue;
        }
        if names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            continue;
        }
        names.push(name);
    }
    names
}
