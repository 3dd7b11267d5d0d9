//! Cohort planner: partitions the roster into independent work units.
//!
//! The planner delegates grouping to the narrative model in a single
//! request (with the bounded `check_intent` tool available), extracts the
//! `<simulation_plan>` block, validates the cohort partition, and caches the
//! result on the cycle context. One corrective retry is allowed for a
//! malformed block and one for a partition violation; a second violation is
//! fatal for the whole planning step, because partition safety is what makes
//! parallel cohort execution sound.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use storyloom_model::{
    extract_tagged_json, render_tool_listing, Conversation, ModelClient, PromptEngine,
    RetryDecision, RetryState, ToolBudget, ToolCall, ToolDescriptor,
};
use storyloom_types::{RosterEntry, SimulationPlan};

use crate::config::SimulationSettings;
use crate::context::CycleContext;
use crate::error::SimulationError;

/// Tag the model must wrap its plan in.
pub const PLAN_TAG: &str = "simulation_plan";

/// A character name that appears in more than one cohort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOffender {
    /// The offending character name.
    pub name: String,
    /// Zero-based indices of every cohort the name appears in.
    pub cohort_indices: Vec<usize>,
}

/// Validate the partition invariant: within one plan, a character name
/// appears in at most one cohort.
///
/// Builds a map from character name to the set of cohort indices it appears
/// in; any name mapping to more than one index is a violation. Returns
/// exactly the overlapping names, and only those, sorted by name.
pub fn validate_partition(plan: &SimulationPlan) -> Result<(), Vec<PartitionOffender>> {
    let mut memberships: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
    for (index, cohort) in plan.cohorts.iter().enumerate() {
        for name in &cohort.characters {
            memberships.entry(name.as_str()).or_default().insert(index);
        }
    }

    let offenders: Vec<PartitionOffender> = memberships
        .into_iter()
        .filter(|(_, indices)| indices.len() > 1)
        .map(|(name, indices)| PartitionOffender {
            name: name.to_owned(),
            cohort_indices: indices.into_iter().collect(),
        })
        .collect();

    if offenders.is_empty() {
        Ok(())
    } else {
        Err(offenders)
    }
}

/// Compose the corrective message for a partition violation, naming the
/// offending characters and their cohort indices.
pub fn partition_feedback(offenders: &[PartitionOffender]) -> String {
    let listing: Vec<String> = offenders
        .iter()
        .map(|o| format!("- {} appears in cohorts {:?}", o.name, o.cohort_indices))
        .collect();
    format!(
        "Your plan places the following characters in more than one cohort:\n{}\n\
         Each character may appear in at most one cohort. Respond again with \
         a corrected plan inside a single <{PLAN_TAG}>...</{PLAN_TAG}> tag.",
        listing.join("\n")
    )
}

/// The planner component.
pub struct CohortPlanner {
    model: Arc<ModelClient>,
    prompts: Arc<PromptEngine>,
    settings: SimulationSettings,
}

impl CohortPlanner {
    /// Create a planner over the given model and prompt engine.
    pub const fn new(
        model: Arc<ModelClient>,
        prompts: Arc<PromptEngine>,
        settings: SimulationSettings,
    ) -> Self {
        Self {
            model,
            prompts,
            settings,
        }
    }

    /// Produce (or return the cached) simulation plan for this cycle.
    ///
    /// # Errors
    ///
    /// [`SimulationError::MalformedModelOutput`] after the corrective retry
    /// for a missing/unparseable plan block;
    /// [`SimulationError::PartitionViolation`] after the corrective retry
    /// for an overlapping partition. Both are fatal for the whole planning
    /// step.
    pub async fn plan(
        &self,
        ctx: &CycleContext,
        roster: &[RosterEntry],
    ) -> Result<SimulationPlan, SimulationError> {
        if let Some(cached) = ctx.plan_cache.get(ctx.cycle_id) {
            debug!(cycle = %ctx.cycle_id, "returning cached simulation plan");
            return Ok(cached);
        }

        let mut conversation = Conversation::new();
        let system = self.prompts.render(
            "planner",
            &serde_json::json!({
                "scene_tracker": ctx.scene_tracker,
                "plan_tag": PLAN_TAG,
            }),
        )?;
        conversation.push_system(system);
        conversation.push_user(build_context_message(ctx, roster));

        let mut plan = self.request_plan(ctx, &mut conversation).await?;

        if let Err(offenders) = validate_partition(&plan) {
            warn!(
                offenders = offenders.len(),
                "simulation plan violated the cohort partition, retrying once"
            );
            conversation.push_user(partition_feedback(&offenders));
            plan = self.request_plan(ctx, &mut conversation).await?;

            if let Err(offenders) = validate_partition(&plan) {
                return Err(SimulationError::PartitionViolation {
                    detail: offenders
                        .iter()
                        .map(|o| format!("{} in cohorts {:?}", o.name, o.cohort_indices))
                        .collect::<Vec<_>>()
                        .join("; "),
                });
            }
        }

        // Standalone entries naming on-stage characters are planner
        // mistakes; drop them rather than double-narrate the scene.
        plan.standalone.retain(|entry| {
            let present = ctx.scene_tracker.contains_character(&entry.character);
            if present {
                error!(
                    character = %entry.character,
                    "planner requested standalone simulation for a character present in the scene, dropping"
                );
            }
            !present
        });

        info!(
            cohorts = plan.cohorts.len(),
            standalone = plan.standalone.len(),
            inference_only = plan.inference_only.len(),
            skipped = plan.skip.len(),
            simulation_needed = plan.simulation_needed,
            "simulation plan ready"
        );

        ctx.plan_cache.store(ctx.cycle_id, &plan);
        Ok(plan)
    }

    /// Drive the conversation until a plan block is extracted.
    ///
    /// Tool calls (`check_intent`) are dispatched inline and do not consume
    /// the extraction retry budget; the driver loop itself is bounded by
    /// `planner_turn_budget`.
    async fn request_plan(
        &self,
        ctx: &CycleContext,
        conversation: &mut Conversation,
    ) -> Result<SimulationPlan, SimulationError> {
        let mut intent_budget = ToolBudget::new("check_intent", self.settings.intent_check_budget);
        let mut retry = RetryState::single();
        let mut turns: u32 = 0;

        loop {
            ctx.ensure_live()?;
            if turns >= self.settings.planner_turn_budget {
                return Err(SimulationError::MalformedModelOutput {
                    unit: String::from("simulation planner"),
                    detail: format!(
                        "no <{PLAN_TAG}> block within {} turns",
                        self.settings.planner_turn_budget
                    ),
                });
            }
            turns = turns.saturating_add(1);

            let response = self.model.complete(conversation).await?;
            conversation.push_assistant(&response);

            match ToolCall::from_response(&response) {
                Ok(Some(call)) => {
                    let result = dispatch_intent_check(ctx, &call, &mut intent_budget);
                    conversation.push_user(result);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    // Malformed tool call: corrective turn, same budget as a
                    // malformed plan block.
                    match retry.fail(e.corrective_feedback()) {
                        RetryDecision::Retry { feedback } => {
                            conversation.push_user(feedback);
                            continue;
                        }
                        RetryDecision::Exhausted => {
                            return Err(SimulationError::MalformedModelOutput {
                                unit: String::from("simulation planner"),
                                detail: e.to_string(),
                            });
                        }
                    }
                }
            }

            match extract_tagged_json::<SimulationPlan>(&response, PLAN_TAG) {
                Ok(plan) => return Ok(plan),
                Err(e) => match retry.fail(e.corrective_feedback()) {
                    RetryDecision::Retry { feedback } => {
                        warn!(error = %e, "simulation plan block malformed, retrying once");
                        conversation.push_user(feedback);
                    }
                    RetryDecision::Exhausted => {
                        return Err(SimulationError::MalformedModelOutput {
                            unit: String::from("simulation planner"),
                            detail: e.to_string(),
                        });
                    }
                },
            }
        }
    }
}

/// The `check_intent` tool descriptor.
fn intent_check_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "check_intent",
        "Check whether a rostered character has flagged intent to interact \
         with someone during the simulation period.",
        &[
            ("character", "Character name (exact match from the roster)"),
            ("period", "The in-world period being planned"),
        ],
    )
}

/// Answer a `check_intent` call from the roster snapshot.
///
/// The answer is deterministic: it reports the intent flags captured by
/// earlier simulations rather than asking the character again.
fn dispatch_intent_check(
    ctx: &CycleContext,
    call: &ToolCall,
    budget: &mut ToolBudget,
) -> String {
    if call.name != "check_intent" {
        return format!(
            "Unknown tool '{}'. Only check_intent is available during planning.",
            call.name
        );
    }
    if !budget.try_consume() {
        return budget.exhausted_notice();
    }

    let Some(name) = call.string_arg("character") else {
        return String::from("check_intent requires a 'character' argument.");
    };

    let Some(character) = ctx.character(name) else {
        return format!("Character '{name}' is not on the roster.");
    };

    let meta = character.simulation_meta.as_ref();
    let pending = meta
        .map(|m| m.pending_protagonist_interaction.clone())
        .unwrap_or_default();
    let potential = meta
        .map(|m| m.potential_interactions.clone())
        .unwrap_or_default();

    if pending.is_null() && potential.is_null() {
        format!("{name} has no flagged intent for this period.")
    } else {
        format!(
            "{name} intent flags:\n- pending protagonist interaction: {}\n- potential interactions: {}",
            serde_json::to_string(&pending).unwrap_or_default(),
            serde_json::to_string(&potential).unwrap_or_default(),
        )
    }
}

/// Compose the planner's context message: scene tracker, roster, world
/// momentum, pending intents, narrative direction, and the tool listing.
fn build_context_message(ctx: &CycleContext, roster: &[RosterEntry]) -> String {
    let mut sections = vec![
        format!(
            "### Story Tracker\n<story_tracker>\nTime: {}\nLocation: {}\nWeather: {}\nCharacters Present: {}\n</story_tracker>",
            ctx.scene_tracker.time,
            ctx.scene_tracker.location,
            ctx.scene_tracker.weather,
            ctx.scene_tracker.characters_present.join(", "),
        ),
        format!(
            "### Character Roster\n<character_roster>\n{}\n</character_roster>",
            format_roster(roster)
        ),
    ];

    if let Some(momentum) = &ctx.world_momentum {
        sections.push(format!(
            "### World Events\n<world_events>\n{}\n</world_events>",
            serde_json::to_string_pretty(momentum).unwrap_or_default()
        ));
    }

    let pending: Vec<&RosterEntry> = roster.iter().filter(|r| !r.pending_intent.is_null()).collect();
    if !pending.is_empty() {
        let lines: Vec<String> = pending
            .iter()
            .map(|r| {
                format!(
                    "**{}**\n{}",
                    r.name,
                    serde_json::to_string(&r.pending_intent).unwrap_or_default()
                )
            })
            .collect();
        sections.push(format!(
            "### Pending Protagonist Interactions\n<pending_interactions>\n{}\n</pending_interactions>",
            lines.join("\n\n")
        ));
    }

    if let Some(direction) = &ctx.narrative_direction {
        sections.push(format!(
            "### Narrative Direction\n<narrative_direction>\n{}\n</narrative_direction>",
            serde_json::to_string_pretty(direction).unwrap_or_default()
        ));
    }

    sections.push(render_tool_listing(&[intent_check_descriptor()]));

    sections.join("\n\n")
}

/// Format the roster for the planner prompt.
fn format_roster(roster: &[RosterEntry]) -> String {
    let rows: Vec<String> = roster
        .iter()
        .map(|entry| {
            let mut lines = vec![
                format!("**{}** ({})", entry.name, entry.importance),
                format!("Location: {}", entry.location),
            ];
            if let Some(last) = &entry.last_simulated {
                lines.push(format!("Last simulated: {last}"));
            }
            if let Some(goals) = &entry.goals_summary {
                lines.push(format!("Goals: {goals}"));
            }
            if let Some(routine) = &entry.routine_summary {
                lines.push(format!("Routine: {routine}"));
            }
            if !entry.key_relationships.is_empty() {
                lines.push(format!(
                    "Key relationships: {}",
                    entry.key_relationships.join(", ")
                ));
            }
            if let Some(notes) = &entry.relationship_notes {
                lines.push(format!("Relationship notes: {notes}"));
            }
            lines.join("\n")
        })
        .collect();
    rows.join("\n\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;
    use storyloom_model::ScriptedBackend;
    use storyloom_types::{
        AdventureId, CharacterRecord, Cohort, CycleId, ImportanceTier, SceneTracker,
        SimulationMeta,
    };

    use super::*;

    fn plan_with_cohorts(cohorts: &[&[&str]]) -> SimulationPlan {
        SimulationPlan {
            simulation_needed: true,
            cohorts: cohorts
                .iter()
                .map(|members| Cohort {
                    characters: members.iter().map(|m| (*m).to_owned()).collect(),
                    ..Cohort::default()
                })
                .collect(),
            ..SimulationPlan::default()
        }
    }

    fn make_character(name: &str, importance: ImportanceTier) -> CharacterRecord {
        CharacterRecord {
            name: name.to_owned(),
            importance,
            ..CharacterRecord::default()
        }
    }

    fn make_context(characters: Vec<CharacterRecord>, present: &[&str]) -> CycleContext {
        let scene = SceneTracker {
            time: String::from("Day 3, dusk"),
            location: String::from("The Lantern Inn"),
            weather: String::from("Rain"),
            characters_present: present.iter().map(|s| (*s).to_owned()).collect(),
        };
        CycleContext::new(AdventureId::new(), CycleId::new(), scene, characters)
    }

    fn test_prompts() -> Arc<PromptEngine> {
        let unique = format!(
            "storyloom_planner_templates_{}_{:?}",
            std::process::id(),
            std::thread::current().id(),
        );
        let dir = std::env::temp_dir().join(unique);
        std::fs::create_dir_all(&dir).ok();
        for name in ["planner", "moderator", "character", "offscreen"] {
            std::fs::write(dir.join(format!("{name}.j2")), "You are the planner.").ok();
        }
        Arc::new(PromptEngine::new(dir.to_str().unwrap_or("")).unwrap())
    }

    fn planner_with_responses(responses: Vec<String>) -> CohortPlanner {
        let model = Arc::new(ModelClient::Scripted(ScriptedBackend::new(responses)));
        CohortPlanner::new(model, test_prompts(), SimulationSettings::default())
    }

    fn plan_response(body: serde_json::Value) -> String {
        format!("<{PLAN_TAG}>{body}</{PLAN_TAG}>")
    }

    #[test]
    fn valid_partition_passes() {
        let plan = plan_with_cohorts(&[&["Alice", "Bob"], &["Edmund"]]);
        assert!(validate_partition(&plan).is_ok());
    }

    #[test]
    fn overlapping_name_is_flagged_with_indices() {
        let plan = plan_with_cohorts(&[&["Alice", "Bob"], &["Alice", "Edmund"]]);
        let offenders = validate_partition(&plan).unwrap_err();
        assert_eq!(offenders.len(), 1);
        let offender = offenders.first().unwrap();
        assert_eq!(offender.name, "Alice");
        assert_eq!(offender.cohort_indices, vec![0, 1]);
    }

    #[test]
    fn feedback_names_offenders() {
        let plan = plan_with_cohorts(&[&["Alice"], &["Alice"]]);
        let offenders = validate_partition(&plan).unwrap_err();
        let feedback = partition_feedback(&offenders);
        assert!(feedback.contains("Alice"));
        assert!(feedback.contains("[0, 1]"));
        assert!(feedback.contains(PLAN_TAG));
    }

    proptest! {
        /// The validator flags exactly the overlapping names, and only
        /// those, over random cohort assignments.
        #[test]
        fn partition_validator_flags_exactly_the_overlaps(
            assignments in proptest::collection::vec(
                (0usize..6, proptest::collection::btree_set(0usize..4, 1..4)),
                0..12,
            )
        ) {
            // Build cohorts from (character index -> cohort indices) pairs.
            let mut cohorts: Vec<Vec<String>> = vec![Vec::new(); 4];
            for (character, cohort_indices) in &assignments {
                let name = format!("Character-{character}");
                for &index in cohort_indices {
                    let members = cohorts.get_mut(index).unwrap();
                    if !members.contains(&name) {
                        members.push(name.clone());
                    }
                }
            }

            let plan = SimulationPlan {
                simulation_needed: true,
                cohorts: cohorts
                    .into_iter()
                    .filter(|members| !members.is_empty())
                    .map(|characters| Cohort { characters, ..Cohort::default() })
                    .collect(),
                ..SimulationPlan::default()
            };

            // Expected overlaps, computed against the *filtered* cohort
            // indices (empty cohorts were dropped).
            let mut memberships: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
            for (index, cohort) in plan.cohorts.iter().enumerate() {
                for name in &cohort.characters {
                    memberships.entry(name.as_str()).or_default().insert(index);
                }
            }
            let expected_offenders: BTreeSet<&str> = memberships
                .iter()
                .filter(|(_, indices)| indices.len() > 1)
                .map(|(name, _)| *name)
                .collect();

            match validate_partition(&plan) {
                Ok(()) => prop_assert!(expected_offenders.is_empty()),
                Err(offenders) => {
                    let flagged: BTreeSet<&str> =
                        offenders.iter().map(|o| o.name.as_str()).collect();
                    prop_assert_eq!(flagged, expected_offenders);
                }
            }
        }
    }

    #[tokio::test]
    async fn cached_plan_returns_without_model_calls() {
        let planner = planner_with_responses(vec![plan_response(json!({
            "simulation_needed": true,
            "simulation_period": {"to": "Day 4, dawn"},
            "cohorts": [],
            "standalone": [{"character": "Alice"}]
        }))]);
        let ctx = make_context(
            vec![make_character("Alice", ImportanceTier::ArcImportant)],
            &[],
        );
        let roster = crate::roster::build_roster(&ctx.characters, &ctx.scene_tracker);

        let first = planner.plan(&ctx, &roster).await.unwrap();
        assert_eq!(planner.model.calls(), 1);

        // Second invocation on the same cycle: zero additional model calls,
        // identical plan.
        let second = planner.plan(&ctx, &roster).await.unwrap();
        assert_eq!(planner.model.calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn malformed_then_wellformed_takes_two_calls() {
        // Scenario: first model response has a missing structured tag; the
        // retried response is well-formed.
        let planner = planner_with_responses(vec![
            String::from("I think Alice and Bob should meet."),
            plan_response(json!({
                "simulation_needed": true,
                "simulation_period": {"to": "Day 4, dawn"},
                "cohorts": [{"characters": ["Alice", "Bob"]}]
            })),
        ]);
        let ctx = make_context(
            vec![
                make_character("Alice", ImportanceTier::ArcImportant),
                make_character("Bob", ImportanceTier::Significant),
            ],
            &[],
        );
        let roster = crate::roster::build_roster(&ctx.characters, &ctx.scene_tracker);

        let plan = planner.plan(&ctx, &roster).await.unwrap();
        assert_eq!(plan.cohorts.len(), 1);
        assert_eq!(planner.model.calls(), 2, "exactly 2 model calls");
    }

    #[tokio::test]
    async fn two_malformed_responses_are_fatal() {
        let planner = planner_with_responses(vec![
            String::from("no tag here"),
            String::from("still no tag"),
        ]);
        let ctx = make_context(
            vec![make_character("Alice", ImportanceTier::ArcImportant)],
            &[],
        );
        let roster = crate::roster::build_roster(&ctx.characters, &ctx.scene_tracker);

        let result = planner.plan(&ctx, &roster).await;
        assert!(matches!(
            result,
            Err(SimulationError::MalformedModelOutput { .. })
        ));
    }

    #[tokio::test]
    async fn partition_violation_retries_then_fails() {
        let bad_plan = plan_response(json!({
            "simulation_needed": true,
            "cohorts": [{"characters": ["Alice", "Bob"]}, {"characters": ["Alice"]}]
        }));
        let planner = planner_with_responses(vec![bad_plan.clone(), bad_plan]);
        let ctx = make_context(
            vec![
                make_character("Alice", ImportanceTier::ArcImportant),
                make_character("Bob", ImportanceTier::Significant),
            ],
            &[],
        );
        let roster = crate::roster::build_roster(&ctx.characters, &ctx.scene_tracker);

        let result = planner.plan(&ctx, &roster).await;
        assert!(matches!(
            result,
            Err(SimulationError::PartitionViolation { .. })
        ));
        assert_eq!(planner.model.calls(), 2);
    }

    #[tokio::test]
    async fn partition_violation_recovers_on_corrected_plan() {
        let planner = planner_with_responses(vec![
            plan_response(json!({
                "simulation_needed": true,
                "cohorts": [{"characters": ["Alice"]}, {"characters": ["Alice"]}]
            })),
            plan_response(json!({
                "simulation_needed": true,
                "cohorts": [{"characters": ["Alice", "Bob"]}]
            })),
        ]);
        let ctx = make_context(
            vec![
                make_character("Alice", ImportanceTier::ArcImportant),
                make_character("Bob", ImportanceTier::Significant),
            ],
            &[],
        );
        let roster = crate::roster::build_roster(&ctx.characters, &ctx.scene_tracker);

        let plan = planner.plan(&ctx, &roster).await.unwrap();
        assert_eq!(plan.cohorts.len(), 1);
    }

    #[tokio::test]
    async fn known_interaction_yields_cohort_otherwise_standalone() {
        // Scenario: roster = [Alice:ArcImportant, Bob:Significant], scene
        // characters present = [Carol]. With a known prior interaction the
        // planner returns one cohort [Alice, Bob]; otherwise standalone
        // entries. The scripted responses stand in for the model following
        // its instructions; the assertion covers the plan shapes the
        // scheduler consumes.
        let with_interaction = plan_response(json!({
            "simulation_needed": true,
            "simulation_period": {"to": "Day 4, dawn"},
            "cohorts": [{"characters": ["Alice", "Bob"]}]
        }));
        let planner = planner_with_responses(vec![with_interaction]);
        let mut alice = make_character("Alice", ImportanceTier::ArcImportant);
        alice.simulation_meta = Some(SimulationMeta {
            potential_interactions: json!([{"with": "Bob", "about": "the ledger"}]),
            ..SimulationMeta::default()
        });
        let ctx = make_context(
            vec![alice, make_character("Bob", ImportanceTier::Significant)],
            &["Carol"],
        );
        let roster = crate::roster::build_roster(&ctx.characters, &ctx.scene_tracker);
        assert_eq!(roster.len(), 2, "Carol is on stage, not on the roster");

        let plan = planner.plan(&ctx, &roster).await.unwrap();
        assert_eq!(plan.cohorts.len(), 1);
        assert_eq!(
            plan.cohorts.first().unwrap().characters,
            vec!["Alice", "Bob"]
        );

        let no_interaction = planner_with_responses(vec![plan_response(json!({
            "simulation_needed": true,
            "simulation_period": {"to": "Day 4, dawn"},
            "standalone": [{"character": "Alice"}, {"character": "Bob"}]
        }))]);
        let ctx2 = make_context(
            vec![
                make_character("Alice", ImportanceTier::ArcImportant),
                make_character("Bob", ImportanceTier::Significant),
            ],
            &["Carol"],
        );
        let roster2 = crate::roster::build_roster(&ctx2.characters, &ctx2.scene_tracker);
        let plan2 = no_interaction.plan(&ctx2, &roster2).await.unwrap();
        assert!(plan2.cohorts.is_empty());
        assert_eq!(plan2.standalone.len(), 2);
    }

    #[tokio::test]
    async fn intent_check_tool_is_dispatched_and_budgeted() {
        let mut alice = make_character("Alice", ImportanceTier::ArcImportant);
        alice.simulation_meta = Some(SimulationMeta {
            pending_protagonist_interaction: json!({"urgency": "high"}),
            ..SimulationMeta::default()
        });
        let ctx = make_context(vec![alice], &[]);

        let call = ToolCall {
            name: String::from("check_intent"),
            arguments: json!({"character": "Alice", "period": "until dawn"}),
        };
        let mut budget = ToolBudget::new("check_intent", 1);
        let answer = dispatch_intent_check(&ctx, &call, &mut budget);
        assert!(answer.contains("urgency"));

        // Budget spent: next call gets the refusal, not an error.
        let refusal = dispatch_intent_check(&ctx, &call, &mut budget);
        assert!(refusal.contains("Maximum number of check_intent calls"));
    }

    #[tokio::test]
    async fn intent_check_unknown_character_is_plain_notice() {
        let ctx = make_context(vec![], &[]);
        let call = ToolCall {
            name: String::from("check_intent"),
            arguments: json!({"character": "Nobody"}),
        };
        let mut budget = ToolBudget::new("check_intent", 5);
        let answer = dispatch_intent_check(&ctx, &call, &mut budget);
        assert!(answer.contains("not on the roster"));
    }

    #[tokio::test]
    async fn tool_loop_resolves_before_plan() {
        let planner = planner_with_responses(vec![
            String::from(
                "<tool_call>{\"name\": \"check_intent\", \"arguments\": {\"character\": \"Alice\"}}</tool_call>",
            ),
            plan_response(json!({
                "simulation_needed": true,
                "standalone": [{"character": "Alice"}]
            })),
        ]);
        let ctx = make_context(
            vec![make_character("Alice", ImportanceTier::ArcImportant)],
            &[],
        );
        let roster = crate::roster::build_roster(&ctx.characters, &ctx.scene_tracker);

        let plan = planner.plan(&ctx, &roster).await.unwrap();
        assert_eq!(plan.standalone.len(), 1);
        assert_eq!(planner.model.calls(), 2);
    }

    #[tokio::test]
    async fn scene_present_standalone_entries_are_dropped() {
        let planner = planner_with_responses(vec![plan_response(json!({
            "simulation_needed": true,
            "standalone": [{"character": "Carol"}, {"character": "Alice"}]
        }))]);
        let ctx = make_context(
            vec![
                make_character("Alice", ImportanceTier::ArcImportant),
                make_character("Carol", ImportanceTier::ArcImportant),
            ],
            &["Carol"],
        );
        let roster = crate::roster::build_roster(&ctx.characters, &ctx.scene_tracker);

        let plan = planner.plan(&ctx, &roster).await.unwrap();
        let names: Vec<&str> = plan.standalone.iter().map(|s| s.character.as_str()).collect();
        assert_eq!(names, vec!["Alice"]);
    }
}
