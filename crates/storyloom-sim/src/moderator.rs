//! Cohort moderator: drives one cohort's interaction turns and enforces the
//! all-members-reflected completion rule.
//!
//! State machine: `Running` -> (all members have a reflection) ->
//! `Completed`; `Running` -> (incomplete after the turn budget) ->
//! `RetryRequested` -> `Running` (one nudge retry) -> `Failed` if still
//! incomplete. A failed cohort fails alone; sibling cohorts are unaffected.
//!
//! Within one cohort, queries are issued sequentially by a single moderator
//! loop, in whatever order the moderator model chooses via the
//! `query_character` tool. Different cohorts' moderations run fully in
//! parallel, which is safe because of the plan's partition invariant.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use storyloom_model::{
    extract_tagged_json, render_tool_listing, Conversation, ModelClient, PromptEngine, ToolBudget,
    ToolCall, ToolDescriptor,
};
use storyloom_types::{
    patch_with, CharacterEvent, CharacterRecord, CharacterUpdate, Cohort, ImportanceTier,
    MemoryRecord, ReflectionSubmission, RelationshipNote, SceneFragment, SimulationMeta,
    SimulationPeriod,
};

use crate::config::SimulationSettings;
use crate::context::CycleContext;
use crate::error::SimulationError;
use crate::knowledge::KnowledgeSource;
use crate::session::{CharacterSession, CohortInput, QueryType, SessionDeps};

/// Tag the moderator wraps its concluding block in.
pub const SIMULATION_TAG: &str = "simulation";

/// The moderator's concluding block: the period it actually simulated.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ModeratorSummary {
    /// The simulated window.
    pub simulation_period: SimulationPeriod,
}

/// Moderation state for one cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CohortPhase {
    /// The moderation loop is in progress.
    Running,
    /// The turn budget elapsed with members missing reflections; one nudge
    /// retry is owed.
    RetryRequested,
    /// Every member has exactly one reflection.
    Completed,
    /// Members were still missing reflections after the nudge retry.
    Failed,
}

/// Decide the phase after a moderation pass.
///
/// A cohort with `n` members completes iff exactly `n` reflections exist;
/// with fewer it transitions to `RetryRequested` (never `Completed`), and to
/// `Failed` once the single retry has been spent.
pub const fn completion_phase(members: usize, submitted: usize, retried: bool) -> CohortPhase {
    if submitted >= members {
        CohortPhase::Completed
    } else if retried {
        CohortPhase::Failed
    } else {
        CohortPhase::RetryRequested
    }
}

/// Result of one completed cohort moderation.
#[derive(Debug)]
pub struct CohortOutcome {
    /// "+"-joined member listing, for logs.
    pub label: String,
    /// The period the moderator reported (or the planner's, as fallback).
    pub period: SimulationPeriod,
    /// Each member's reflection, keyed by character name.
    pub reflections: BTreeMap<String, ReflectionSubmission>,
    /// Folded character updates, one per member.
    pub updates: Vec<CharacterUpdate>,
    /// Cross-character events emitted by the members' reflections.
    pub emitted_events: Vec<CharacterEvent>,
}

/// The moderator component.
pub struct CohortModerator {
    model: Arc<ModelClient>,
    prompts: Arc<PromptEngine>,
    knowledge: Arc<dyn KnowledgeSource>,
    settings: SimulationSettings,
}

impl CohortModerator {
    /// Create a moderator over the given collaborators.
    pub const fn new(
        model: Arc<ModelClient>,
        prompts: Arc<PromptEngine>,
        knowledge: Arc<dyn KnowledgeSource>,
        settings: SimulationSettings,
    ) -> Self {
        Self {
            model,
            prompts,
            knowledge,
            settings,
        }
    }

    /// Moderate one cohort to completion.
    ///
    /// # Errors
    ///
    /// [`SimulationError::IncompleteReflections`] when members are still
    /// missing reflections after the nudge retry; model/template failures
    /// propagate. All failures are scoped to this cohort.
    #[allow(clippy::too_many_lines)]
    pub async fn run(
        &self,
        ctx: &CycleContext,
        cohort: &Cohort,
        planner_period: &SimulationPeriod,
    ) -> Result<CohortOutcome, SimulationError> {
        let label = cohort.characters.join("+");

        let mut sessions: BTreeMap<String, CharacterSession> = BTreeMap::new();
        for name in &cohort.characters {
            match ctx.character(name) {
                Some(record) => {
                    sessions.insert(
                        name.clone(),
                        CharacterSession::new(record.clone(), &self.settings),
                    );
                }
                None => {
                    warn!(cohort = %label, character = %name, "cohort member not found in cycle context");
                }
            }
        }
        if sessions.is_empty() {
            return Err(SimulationError::IncompleteReflections {
                cohort: label,
                missing: cohort.characters.clone(),
            });
        }

        let input = CohortInput {
            period: serde_json::to_string(planner_period).unwrap_or_default(),
            known_interactions: cohort.extra.clone(),
            world_events: ctx.world_momentum.clone(),
            significant_characters: ctx
                .characters
                .iter()
                .filter(|c| {
                    c.importance == ImportanceTier::Significant
                        && !cohort.characters.iter().any(|m| m.eq_ignore_ascii_case(&c.name))
                })
                .map(|c| c.name.clone())
                .collect(),
        };

        let deps = SessionDeps {
            model: Arc::clone(&self.model),
            prompts: Arc::clone(&self.prompts),
            knowledge: Arc::clone(&self.knowledge),
            cancel: ctx.cancel.clone(),
        };

        let mut conversation = Conversation::new();
        let system = self.prompts.render(
            "moderator",
            &serde_json::json!({
                "cohort_names": label,
                "simulation_tag": SIMULATION_TAG,
            }),
        )?;
        conversation.push_system(system);
        conversation.push_user(build_context_message(&sessions, &input));
        conversation.push_user(format!(
            "Run the simulation for this cohort: {label}\n\nBegin."
        ));

        let mut query_budget =
            ToolBudget::new("query_character", self.settings.query_character_budget);

        info!(cohort = %label, "starting cohort moderation");
        let mut summary = self
            .drive(
                ctx,
                &mut conversation,
                &mut sessions,
                &deps,
                &input,
                &mut query_budget,
                self.settings.moderator_turn_budget,
            )
            .await?;

        let mut phase = completion_phase(
            sessions.len(),
            sessions
                .values()
                .filter(|s| s.submitted_reflection().is_some())
                .count(),
            false,
        );

        if phase == CohortPhase::RetryRequested {
            let missing = pending_members(&sessions);
            warn!(
                cohort = %label,
                missing = ?missing,
                "reflections incomplete after moderation pass, nudging once"
            );
            conversation.push_user(format!(
                "The following cohort members have not submitted their \
                 reflection: {}. Query each of them with a Reflection query \
                 so they submit it, then conclude with your <{SIMULATION_TAG}> block.",
                missing.join(", ")
            ));
            let retry_summary = self
                .drive(
                    ctx,
                    &mut conversation,
                    &mut sessions,
                    &deps,
                    &input,
                    &mut query_budget,
                    self.settings.nudge_turn_budget,
                )
                .await?;
            if retry_summary.is_some() {
                summary = retry_summary;
            }

            phase = completion_phase(
                sessions.len(),
                sessions
                    .values()
                    .filter(|s| s.submitted_reflection().is_some())
                    .count(),
                true,
            );
        }

        if phase != CohortPhase::Completed {
            return Err(SimulationError::IncompleteReflections {
                cohort: label,
                missing: pending_members(&sessions),
            });
        }

        let period = summary.map_or_else(|| planner_period.clone(), |s| s.simulation_period);

        let mut reflections = BTreeMap::new();
        let mut updates = Vec::new();
        let mut emitted_events = Vec::new();
        for session in sessions.values() {
            if let Some(reflection) = session.submitted_reflection() {
                let (update, events) =
                    fold_reflection(ctx, session.character(), reflection, &period);
                reflections.insert(session.name().to_owned(), reflection.clone());
                updates.push(update);
                emitted_events.extend(events);
            }
        }

        info!(
            cohort = %label,
            reflections = reflections.len(),
            events = emitted_events.len(),
            "cohort moderation completed"
        );

        Ok(CohortOutcome {
            label,
            period,
            reflections,
            updates,
            emitted_events,
        })
    }

    /// Run the moderator's sequential tool loop for up to `turn_budget`
    /// turns. Returns the concluding summary when the model produced one.
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        ctx: &CycleContext,
        conversation: &mut Conversation,
        sessions: &mut BTreeMap<String, CharacterSession>,
        deps: &SessionDeps,
        input: &CohortInput,
        query_budget: &mut ToolBudget,
        turn_budget: u32,
    ) -> Result<Option<ModeratorSummary>, SimulationError> {
        let mut turns: u32 = 0;

        loop {
            ctx.ensure_live()?;
            if turns >= turn_budget {
                return Ok(None);
            }
            turns = turns.saturating_add(1);

            let response = self.model.complete(conversation).await?;
            conversation.push_assistant(&response);

            match ToolCall::from_response(&response) {
                Ok(Some(call)) if call.name == "query_character" => {
                    let result = self
                        .query_character(sessions, deps, input, &call, query_budget)
                        .await?;
                    conversation.push_user(result);
                }
                Ok(Some(call)) => {
                    conversation.push_user(format!(
                        "Unknown tool '{}'. Only query_character is available.",
                        call.name
                    ));
                }
                Ok(None) => {
                    if let Ok(summary) =
                        extract_tagged_json::<ModeratorSummary>(&response, SIMULATION_TAG)
                    {
                        return Ok(Some(summary));
                    }
                    conversation.push_user(format!(
                        "Continue the simulation with query_character calls, or \
                         conclude with a single <{SIMULATION_TAG}> block."
                    ));
                }
                Err(e) => {
                    conversation.push_user(e.corrective_feedback());
                }
            }
        }
    }

    /// Route one `query_character` call to the named member session.
    async fn query_character(
        &self,
        sessions: &mut BTreeMap<String, CharacterSession>,
        deps: &SessionDeps,
        input: &CohortInput,
        call: &ToolCall,
        budget: &mut ToolBudget,
    ) -> Result<String, SimulationError> {
        if !budget.try_consume() {
            return Ok(budget.exhausted_notice());
        }

        let Some(name) = call.string_arg("character") else {
            return Ok(String::from(
                "query_character requires a 'character' argument.",
            ));
        };
        let Some(query_type) = call
            .string_arg("query_type")
            .and_then(|s| QueryType::from_str(s).ok())
        else {
            return Ok(String::from(
                "Error: Invalid query_type. Must be 'intention', 'response', or 'reflection'.",
            ));
        };

        let key = sessions
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned();
        let Some(key) = key else {
            let available: Vec<&str> = sessions.keys().map(String::as_str).collect();
            warn!(character = %name, "query for character not in cohort");
            return Ok(format!(
                "Error: Character '{name}' not found in cohort. Available characters: {}",
                available.join(", ")
            ));
        };
        let Some(session) = sessions.get_mut(&key) else {
            return Ok(format!("Error: Character '{name}' session unavailable."));
        };

        let stimulus = call.string_arg("stimulus").unwrap_or_default();
        let query = call.string_arg("query").unwrap_or_default();

        let prose = session
            .invoke_query(deps, input, query_type, stimulus, query)
            .await?;

        Ok(format!("**{key} ({query_type}):**\n{prose}"))
    }
}

/// Members that have not submitted a reflection, in name order.
fn pending_members(sessions: &BTreeMap<String, CharacterSession>) -> Vec<String> {
    sessions
        .values()
        .filter(|s| s.submitted_reflection().is_none())
        .map(|s| s.name().to_owned())
        .collect()
}

/// Compose the moderator's context message: cohort members with their
/// in-cohort relationships, the period, known interactions, world events,
/// significant characters, and the tool listing.
fn build_context_message(
    sessions: &BTreeMap<String, CharacterSession>,
    input: &CohortInput,
) -> String {
    let mut out = String::from("## Cohort\n\n");
    for session in sessions.values() {
        let character = session.character();
        out.push_str(&format!("### {}\n", character.name));
        out.push_str(&format!("- Location: {}\n", character.location()));
        out.push_str(&format!("- Description: {}\n", character.description));

        let in_cohort: Vec<&RelationshipNote> = character
            .relationships
            .iter()
            .filter(|r| sessions.keys().any(|k| k.eq_ignore_ascii_case(&r.target)))
            .collect();
        if !in_cohort.is_empty() {
            out.push_str("- Relationships within cohort:\n");
            for rel in in_cohort {
                out.push_str(&format!(
                    "  - {}: {}\n",
                    rel.target,
                    serde_json::to_string(&rel.dynamic).unwrap_or_default()
                ));
            }
        }
        out.push('\n');
    }

    out.push_str("## Time Period\n");
    out.push_str(&format!("Simulate: {}\n\n", input.period));

    if !input.known_interactions.is_empty() {
        out.push_str("## Known Interactions\n");
        out.push_str(
            "These interactions are already confirmed from intent checks. \
             Orchestrate them appropriately.\n\n",
        );
        out.push_str(&serde_json::to_string_pretty(&input.known_interactions).unwrap_or_default());
        out.push_str("\n\n");
    }

    out.push_str("## World Events\n");
    match &input.world_events {
        Some(events) => {
            out.push_str(&serde_json::to_string_pretty(events).unwrap_or_default());
        }
        None => out.push_str("No significant world events."),
    }
    out.push_str("\n\n");

    out.push_str("## Significant Characters (Available for Interaction)\n");
    if input.significant_characters.is_empty() {
        out.push_str("None available.\n\n");
    } else {
        out.push_str(&format!("{}\n\n", input.significant_characters.join(", ")));
    }

    out.push_str(&render_tool_listing(&[query_character_descriptor()]));
    out
}

/// The `query_character` tool descriptor.
fn query_character_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "query_character",
        "Query a cohort member for their response to a situation. Returns \
         the character's prose. Use query_type 'intention' to ask what they \
         plan to do, 'response' for reactions, 'reflection' for their final \
         simulation output.",
        &[
            ("character", "Character name (exact match from cohort members)"),
            ("query_type", "'intention', 'response', or 'reflection'"),
            ("stimulus", "What's happening that they're responding to"),
            ("query", "What you're asking them"),
        ],
    )
}

/// Fold one member's reflection into a character update plus the events it
/// emitted.
pub(crate) fn fold_reflection(
    ctx: &CycleContext,
    character: &CharacterRecord,
    reflection: &ReflectionSubmission,
    period: &SimulationPeriod,
) -> (CharacterUpdate, Vec<CharacterEvent>) {
    let profile = patch_with(&character.profile, &reflection.profile_updates);
    let tracker = patch_with(&character.tracker, &reflection.tracker_updates);

    let memories: Vec<MemoryRecord> = reflection
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
    let scene_fragments: Vec<SceneFragment> = reflection
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

    let relationships: Vec<RelationshipNote> = reflection
        .relationship_updates
        .iter()
        .map(|update| {
            character
                .relationships
                .iter()
                .find(|r| r.target.eq_ignore_ascii_case(&update.name))
                .map_or_else(
                    || RelationshipNote {
                        target: update.name.clone(),
                        dynamic: update.dynamic.clone(),
                        data: update.extra.clone(),
                        sequence: 0,
                    },
                    |existing| RelationshipNote {
                        target: existing.target.clone(),
                        dynamic: update.dynamic.clone(),
                        data: patch_with(&existing.data, &update.extra),
                        sequence: existing.sequence.saturating_add(1),
                    },
                )
        })
        .collect();

    let events: Vec<CharacterEvent> = reflection
        .character_events
        .iter()
        .map(|event| {
            CharacterEvent::new(
                ctx.adventure_id,
                event.character.clone(),
                character.name.clone(),
                event.time.clone(),
                event.event.clone(),
                event.my_read.clone(),
            )
        })
        .collect();

    let update = CharacterUpdate {
        character_id: character.id,
        name: character.name.clone(),
        profile,
        tracker,
        alive: true,
        memories,
        scene_fragments,
        relationships,
        consumed_event_ids: Vec::new(),
        simulation_meta: Some(SimulationMeta {
            last_simulated: Some(period.to.clone()),
            potential_interactions: reflection.potential_interactions.clone(),
            pending_protagonist_interaction: reflection.pending_protagonist_interaction.clone(),
        }),
    };

    (update, events)
}
