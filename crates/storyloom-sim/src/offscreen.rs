//! Offscreen inference runner: single-shot narration for characters who do
//! not need a full cohort simulation.
//!
//! One request per character, no turn protocol. The input carries the
//! character's pending events, an elapsed-time description, and world
//! momentum; the output is zero or more narrated time-slices plus profile
//! and tracker deltas. After narration the branch delegates to the tracker
//! oracle for the authoritative post-run tracker and alive/dead flag, then
//! appends its update under the merge lock.
//!
//! All branches run in parallel. A single branch failing aborts only that
//! branch; the fan-in fails if any branch faulted, but branches that already
//! appended their update are not rolled back.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use storyloom_model::{
    extract_tagged_json, Conversation, ModelClient, PromptEngine, RetryDecision, RetryState,
};
use storyloom_types::{
    patch_with, CharacterEvent, CharacterRecord, CharacterUpdate, MemoryRecord, OffscreenInference,
    SceneFragment, SimulationMeta, SimulationPeriod,
};

use crate::config::SimulationSettings;
use crate::context::CycleContext;
use crate::error::SimulationError;
use crate::store::StoryStore;
use crate::tracker::{TrackerOracle, TrackerVerdict};

/// Tag the model must wrap its inference in.
pub const INFERENCE_TAG: &str = "offscreen_inference";

/// The offscreen inference component.
pub struct OffscreenRunner {
    model: Arc<ModelClient>,
    prompts: Arc<PromptEngine>,
    oracle: Arc<dyn TrackerOracle>,
    store: Arc<dyn StoryStore>,
    #[allow(dead_code)]
    settings: SimulationSettings,
}

impl OffscreenRunner {
    /// Create a runner over the given collaborators.
    pub const fn new(
        model: Arc<ModelClient>,
        prompts: Arc<PromptEngine>,
        oracle: Arc<dyn TrackerOracle>,
        store: Arc<dyn StoryStore>,
        settings: SimulationSettings,
    ) -> Self {
        Self {
            model,
            prompts,
            oracle,
            store,
            settings,
        }
    }

    /// Run inference for every named character, all branches in parallel.
    ///
    /// Characters that already have a merged update this cycle are skipped
    /// (no-double-update invariant), as are names with no character record.
    /// Returns the number of branches that merged successfully.
    ///
    /// # Errors
    ///
    /// Returns the first branch failure after all branches settle. Branches
    /// that merged before the failure keep their state.
    pub async fn run_all(
        &self,
        ctx: &Arc<CycleContext>,
        names: &[String],
        period: &SimulationPeriod,
    ) -> Result<usize, SimulationError> {
        let mut branches: JoinSet<Result<(), SimulationError>> = JoinSet::new();

        for name in names {
            if ctx.merge.has_update(name) {
                warn!(
                    character = %name,
                    "character already has an update this cycle, skipping inference"
                );
                continue;
            }
            let Some(character) = ctx.character(name) else {
                warn!(character = %name, "inference requested for unknown character, skipping");
                continue;
            };

            let model = Arc::clone(&self.model);
            let prompts = Arc::clone(&self.prompts);
            let oracle = Arc::clone(&self.oracle);
            let store = Arc::clone(&self.store);
            let ctx = Arc::clone(ctx);
            let character = character.clone();
            let period = period.clone();

            branches.spawn(async move {
                run_branch(model, prompts, oracle, store, ctx, character, period).await
            });
        }

        let mut merged: usize = 0;
        let mut first_error: Option<SimulationError> = None;
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok(Ok(())) => merged = merged.saturating_add(1),
                Ok(Err(e)) => {
                    warn!(error = %e, "offscreen branch failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(SimulationError::Branch(e.to_string()));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(merged),
        }
    }
}

/// Run one character's inference branch end to end.
async fn run_branch(
    model: Arc<ModelClient>,
    prompts: Arc<PromptEngine>,
    oracle: Arc<dyn TrackerOracle>,
    store: Arc<dyn StoryStore>,
    ctx: Arc<CycleContext>,
    character: CharacterRecord,
    period: SimulationPeriod,
) -> Result<(), SimulationError> {
    ctx.ensure_live()?;

    let events = store
        .unconsumed_events(ctx.adventure_id, &character.name)
        .await?;
    let elapsed = elapsed_description(
        character
            .simulation_meta
            .as_ref()
            .and_then(|m| m.last_simulated.as_deref()),
        &ctx.scene_tracker.time,
    );

    info!(
        character = %character.name,
        events = events.len(),
        elapsed = %elapsed,
        "running offscreen inference"
    );

    let mut conversation = Conversation::new();
    let system = prompts.render(
        "offscreen",
        &serde_json::json!({
            "name": character.name,
            "description": character.description,
            "profile": serde_json::to_string_pretty(&character.profile).unwrap_or_default(),
            "tracker": serde_json::to_string_pretty(&character.tracker).unwrap_or_default(),
            "inference_tag": INFERENCE_TAG,
        }),
    )?;
    conversation.push_system(system);
    conversation.push_user(build_inference_message(&ctx, &events, &elapsed, &period));

    let inference = request_inference(&model, &ctx, &character.name, &mut conversation).await?;

    // Fold the narrated deltas, then let the oracle rule on the result.
    let mut proposed = patch_with(&character.tracker, &inference.tracker_updates);
    if !proposed.contains_key("location") {
        proposed.insert(
            String::from("location"),
            serde_json::Value::String(inference.current_situation.location.clone()),
        );
    }
    let narrative: Vec<&str> = inference.scenes.iter().map(|s| s.narrative.as_str()).collect();
    let verdict = oracle
        .finalize(
            &character,
            &character.tracker,
            &proposed,
            &narrative.join("\n\n"),
        )
        .await?;

    let consumed: Vec<_> = events.iter().map(|e| e.id).collect();
    let update = fold_inference(&character, &inference, verdict, consumed, &ctx.scene_tracker.time);

    info!(
        character = %character.name,
        location = %inference.current_situation.location,
        activity = %inference.current_situation.activity,
        alive = update.alive,
        "offscreen inference merged"
    );
    ctx.merge.push(update);
    Ok(())
}

/// Single-shot request with one corrective retry on a malformed block.
async fn request_inference(
    model: &ModelClient,
    ctx: &CycleContext,
    name: &str,
    conversation: &mut Conversation,
) -> Result<OffscreenInference, SimulationError> {
    let mut retry = RetryState::single();
    loop {
        ctx.ensure_live()?;
        let response = model.complete(conversation).await?;
        conversation.push_assistant(&response);

        match extract_tagged_json::<OffscreenInference>(&response, INFERENCE_TAG) {
            Ok(inference) => return Ok(inference),
            Err(e) => match retry.fail(e.corrective_feedback()) {
                RetryDecision::Retry { feedback } => {
                    warn!(character = %name, error = %e, "inference block malformed, retrying once");
                    conversation.push_user(feedback);
                }
                RetryDecision::Exhausted => {
                    return Err(SimulationError::MalformedModelOutput {
                        unit: format!("offscreen inference for {name}"),
                        detail: e.to_string(),
                    });
                }
            },
        }
    }
}

/// Fold an inference output into the character's update.
fn fold_inference(
    character: &CharacterRecord,
    inference: &OffscreenInference,
    verdict: TrackerVerdict,
    consumed_event_ids: Vec<storyloom_types::CharacterEventId>,
    current_time: &str,
) -> CharacterUpdate {
    let memories: Vec<MemoryRecord> = inference
        .scenes
        .iter()
        .map(|scene| MemoryRecord {
            summary: scene.memory.summary.clone(),
            salience: scene.memory.salience,
            scene_tracker: Some(scene.story_tracker.clone()),
            data: scene.memory.extra.clone(),
        })
        .collect();

    let base_sequence = character.last_fragment_sequence();
    let scene_fragments: Vec<SceneFragment> = inference
        .scenes
        .iter()
        .enumerate()
        .map(|(i, scene)| SceneFragment {
            content: scene.narrative.clone(),
            sequence: base_sequence
                .saturating_add(1)
                .saturating_add(u32::try_from(i).unwrap_or(u32::MAX)),
            tracker: Some(scene.story_tracker.clone()),
        })
        .collect();

    let existing_meta = character.simulation_meta.clone().unwrap_or_default();

    CharacterUpdate {
        character_id: character.id,
        name: character.name.clone(),
        profile: patch_with(&character.profile, &inference.profile_updates),
        tracker: verdict.tracker,
        alive: verdict.alive,
        memories,
        scene_fragments,
        relationships: Vec::new(),
        consumed_event_ids,
        simulation_meta: Some(SimulationMeta {
            last_simulated: Some(current_time.to_owned()),
            ..existing_meta
        }),
    }
}

/// Compose the inference context message.
fn build_inference_message(
    ctx: &CycleContext,
    events: &[CharacterEvent],
    elapsed: &str,
    period: &SimulationPeriod,
) -> String {
    let mut sections = vec![
        format!("### Time Elapsed\n{elapsed}"),
        format!("### Current In-World Time\n{}", ctx.scene_tracker.time),
        format!(
            "### Simulation Period\n{}",
            serde_json::to_string(period).unwrap_or_default()
        ),
    ];

    if events.is_empty() {
        sections.push(String::from(
            "### Events That Reached You\nNothing notable reached this character.",
        ));
    } else {
        let lines: Vec<String> = events
            .iter()
            .map(|e| {
                format!(
                    "- [{}] from {}: {} (their read: {})",
                    e.time, e.source_character, e.event, e.source_read
                )
            })
            .collect();
        sections.push(format!(
            "### Events That Reached You\n{}",
            lines.join("\n")
        ));
    }

    if let Some(momentum) = &ctx.world_momentum {
        sections.push(format!(
            "### World Events\n{}",
            serde_json::to_string_pretty(momentum).unwrap_or_default()
        ));
    }

    sections.join("\n\n")
}

/// Human-readable elapsed-time description since the last simulation.
fn elapsed_description(last_simulated: Option<&str>, current_time: &str) -> String {
    match last_simulated {
        None => String::from("Unknown (first inference)"),
        Some(_) if current_time.is_empty() => String::from("Unknown"),
        Some(last) => format!("Since {last}"),
    }
}
