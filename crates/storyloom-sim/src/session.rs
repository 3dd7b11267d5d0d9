//! Per-character multi-turn simulation session.
//!
//! A session owns one character's append-only conversation during a
//! moderation pass. The first query lazily builds the character's full
//! identity context (profile, physical state, relationships, recent
//! memories, simulation-period and world-event context) as a one-time
//! system message; later queries append only the new turn. During a query
//! the character may call `search_world_knowledge` (budgeted) and
//! `submit_reflection`; the submitted payload is captured once and exposed
//! read-only to the moderator.

use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use storyloom_model::{
    render_tool_listing, Conversation, ModelClient, PromptEngine, ToolBudget, ToolCall,
    ToolDescriptor,
};
use storyloom_types::{CharacterRecord, JsonMap, ReflectionSubmission};

use crate::config::SimulationSettings;
use crate::error::SimulationError;
use crate::knowledge::KnowledgeSource;

/// Query types for moderator-to-character communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// Ask the character what they intend to do during the period.
    Intention,
    /// Ask the character to respond to a situation or stimulus.
    Response,
    /// Ask the character to conclude and submit their reflection.
    Reflection,
}

impl core::fmt::Display for QueryType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Intention => write!(f, "Intention"),
            Self::Response => write!(f, "Response"),
            Self::Reflection => write!(f, "Reflection"),
        }
    }
}

/// Error returned for an unrecognized query type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown query type (expected intention, response, or reflection)")]
pub struct ParseQueryTypeError;

impl FromStr for QueryType {
    type Err = ParseQueryTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "intention" => Ok(Self::Intention),
            "response" => Ok(Self::Response),
            "reflection" => Ok(Self::Reflection),
            _ => Err(ParseQueryTypeError),
        }
    }
}

/// Shared collaborator handles for all sessions of one moderation pass.
pub struct SessionDeps {
    /// The narrative model.
    pub model: Arc<ModelClient>,
    /// Prompt templates.
    pub prompts: Arc<PromptEngine>,
    /// World-knowledge retrieval.
    pub knowledge: Arc<dyn KnowledgeSource>,
    /// Shared cancellation signal.
    pub cancel: CancellationToken,
}

/// Cohort-wide context shared by every member session.
#[derive(Debug, Clone, Default)]
pub struct CohortInput {
    /// The in-world period being simulated, rendered for prompts.
    pub period: String,
    /// Interactions already confirmed by intent checks.
    pub known_interactions: JsonMap,
    /// World events that may affect behavior.
    pub world_events: Option<serde_json::Value>,
    /// Significant characters available for interaction.
    pub significant_characters: Vec<String>,
}

/// One character's simulation session.
pub struct CharacterSession {
    character: CharacterRecord,
    conversation: Conversation,
    reflection: Option<ReflectionSubmission>,
    reflection_prompt_added: bool,
    knowledge_budget: ToolBudget,
    turn_budget: u32,
    recent_fragment_limit: usize,
}

impl CharacterSession {
    /// Create a session for the given character snapshot.
    pub fn new(character: CharacterRecord, settings: &SimulationSettings) -> Self {
        Self {
            character,
            conversation: Conversation::new(),
            reflection: None,
            reflection_prompt_added: false,
            knowledge_budget: ToolBudget::new(
                "search_world_knowledge",
                settings.knowledge_budget,
            ),
            turn_budget: settings.session_turn_budget,
            recent_fragment_limit: settings.recent_fragment_limit,
        }
    }

    /// The character's name.
    pub fn name(&self) -> &str {
        &self.character.name
    }

    /// The character snapshot the session was built from.
    pub const fn character(&self) -> &CharacterRecord {
        &self.character
    }

    /// The reflection the character submitted, if any. Read-only; captured
    /// at most once per session.
    pub const fn submitted_reflection(&self) -> Option<&ReflectionSubmission> {
        self.reflection.as_ref()
    }

    /// The session's message log (append-only).
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Route one moderator query to the character and return their prose
    /// response.
    ///
    /// # Errors
    ///
    /// Propagates model and template failures; honors the shared
    /// cancellation signal at each call boundary.
    pub async fn invoke_query(
        &mut self,
        deps: &SessionDeps,
        input: &CohortInput,
        query_type: QueryType,
        stimulus: &str,
        query: &str,
    ) -> Result<String, SimulationError> {
        if self.conversation.is_empty() {
            let identity = self.build_identity_message(&deps.prompts, input)?;
            self.conversation.push_system(identity);
            debug!(character = %self.character.name, "character identity context built");
        }

        self.conversation
            .push_user(build_user_message(query_type, stimulus, query));

        if query_type == QueryType::Reflection && !self.reflection_prompt_added {
            self.conversation.push_user(
                "The simulation period has concluded. Compose your complete \
                 reflection and submit it with the submit_reflection tool, \
                 then answer in prose.",
            );
            self.reflection_prompt_added = true;
        }

        let mut last_response = String::new();
        let mut turns: u32 = 0;

        loop {
            if deps.cancel.is_cancelled() {
                return Err(SimulationError::Cancelled);
            }
            if turns >= self.turn_budget {
                warn!(
                    character = %self.character.name,
                    turns,
                    "session turn budget exhausted, returning last response"
                );
                return Ok(last_response);
            }
            turns = turns.saturating_add(1);

            let response = deps.model.complete(&self.conversation).await?;
            self.conversation.push_assistant(&response);
            last_response.clone_from(&response);

            match ToolCall::from_response(&response) {
                Ok(Some(call)) => {
                    let result = self.dispatch_tool(deps, &call).await;
                    self.conversation.push_user(result);
                }
                Ok(None) => return Ok(response),
                Err(e) => {
                    self.conversation.push_user(e.corrective_feedback());
                }
            }
        }
    }

    /// Handle one tool call from the character.
    async fn dispatch_tool(&mut self, deps: &SessionDeps, call: &ToolCall) -> String {
        match call.name.as_str() {
            "search_world_knowledge" => self.search_knowledge(deps, call).await,
            "submit_reflection" => self.capture_reflection(call),
            other => format!(
                "Unknown tool '{other}'. Available tools: search_world_knowledge, submit_reflection."
            ),
        }
    }

    /// Run a budgeted world-knowledge search.
    async fn search_knowledge(&mut self, deps: &SessionDeps, call: &ToolCall) -> String {
        if !self.knowledge_budget.try_consume() {
            return self.knowledge_budget.exhausted_notice();
        }

        let queries: Vec<String> = call
            .arguments
            .get("queries")
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        if queries.is_empty() {
            return String::from(
                "search_world_knowledge requires a 'queries' array of search strings.",
            );
        }

        match deps.knowledge.search(&queries).await {
            Ok(results) if results.is_empty() => String::from(
                "The world knowledge does not contain relevant information for your queries.",
            ),
            Ok(results) => {
                let mut out = String::from("World Knowledge:\n");
                for result in results {
                    out.push_str(&format!("- {result}\n"));
                }
                out
            }
            Err(e) => {
                warn!(character = %self.character.name, error = %e, "knowledge search failed");
                String::from("World knowledge search is unavailable right now.")
            }
        }
    }

    /// Capture the one-time reflection payload.
    fn capture_reflection(&mut self, call: &ToolCall) -> String {
        if self.reflection.is_some() {
            return String::from(
                "Your reflection was already recorded; it cannot be submitted twice.",
            );
        }
        match serde_json::from_value::<ReflectionSubmission>(call.arguments.clone()) {
            Ok(reflection) => {
                info!(
                    character = %self.character.name,
                    scenes = reflection.scenes.len(),
                    "reflection submitted"
                );
                self.reflection = Some(reflection);
                String::from("Reflection recorded. Answer the query in prose to conclude.")
            }
            Err(e) => format!(
                "Your reflection payload failed to parse: {e}. Submit it again \
                 as a JSON object matching your output instructions."
            ),
        }
    }

    /// Render the one-time identity system message.
    fn build_identity_message(
        &self,
        prompts: &PromptEngine,
        input: &CohortInput,
    ) -> Result<String, SimulationError> {
        let ctx = serde_json::json!({
            "name": self.character.name,
            "description": self.character.description,
            "profile": serde_json::to_string_pretty(&self.character.profile)
                .unwrap_or_default(),
            "tracker": tracker_text(&self.character),
            "relationships": format_relationships(&self.character),
            "recent_memories": scene_history(&self.character, self.recent_fragment_limit),
            "time_period": input.period,
            "world_events": input
                .world_events
                .as_ref()
                .map(|v| serde_json::to_string_pretty(v).unwrap_or_default())
                .unwrap_or_else(|| String::from("No significant world events.")),
            "significant_characters": format_significant(&input.significant_characters),
        });
        let rendered = prompts.render("character", &ctx)?;
        Ok(format!("{rendered}\n\n{}", render_tool_listing(&session_tools())))
    }
}

/// The tools a character session exposes.
fn session_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "search_world_knowledge",
            "Search the world's knowledge for locations, lore, events, or \
             your own recorded memories.",
            &[("queries", "Array of search strings (batch related queries)")],
        ),
        ToolDescriptor::new(
            "submit_reflection",
            "Submit your one-time structured reflection for this simulation \
             period. Arguments are the reflection JSON object itself.",
            &[],
        ),
    ]
}

/// Compose one moderator query as a user message.
fn build_user_message(query_type: QueryType, stimulus: &str, query: &str) -> String {
    if stimulus.trim().is_empty() {
        format!("**Query ({query_type}):** {query}")
    } else {
        format!("**Stimulus:** {stimulus}\n\n**Query ({query_type}):** {query}")
    }
}

/// The character's physical state, or a placeholder when untracked.
fn tracker_text(character: &CharacterRecord) -> String {
    if character.tracker.is_empty() {
        String::from("No physical state tracked.")
    } else {
        serde_json::to_string_pretty(&character.tracker).unwrap_or_default()
    }
}

/// Format relationship notes for the identity context.
fn format_relationships(character: &CharacterRecord) -> String {
    if character.relationships.is_empty() {
        return String::from("No established relationships.");
    }

    let mut out = String::new();
    for rel in &character.relationships {
        out.push_str(&format!("### {}\n", rel.target));
        out.push_str(&format!(
            "**Dynamic:** {}\n",
            serde_json::to_string(&rel.dynamic).unwrap_or_default()
        ));
        if !rel.data.is_empty() {
            out.push_str(&format!(
                "**Details:** {}\n",
                serde_json::to_string(&rel.data).unwrap_or_default()
            ));
        }
        out.push('\n');
    }
    out
}

/// Format the character's most recent scene fragments, capped at `limit`.
fn scene_history(character: &CharacterRecord, limit: usize) -> String {
    if character.scene_fragments.is_empty() {
        return String::from("*No previous scenes recorded.*");
    }

    let mut fragments: Vec<_> = character.scene_fragments.iter().collect();
    fragments.sort_by_key(|s| s.sequence);
    let skip = fragments.len().saturating_sub(limit);

    let mut out = String::from(
        "These are scenes from your perspective (your memories of recent \
         events). This simulation continues from where you left off.\n\n",
    );
    for scene in fragments.iter().skip(skip) {
        out.push_str("---\n");
        out.push_str(&format!("**Scene {}**\n", scene.sequence));
        if let Some(tracker) = &scene.tracker {
            out.push_str(&format!("Time: {}\n", tracker.time));
            out.push_str(&format!("Location: {}\n", tracker.location));
        }
        out.push('\n');
        out.push_str(&scene.content);
        out.push_str("\n\n");
    }
    out
}

/// Format the significant-characters listing.
fn format_significant(names: &[String]) -> String {
    if names.is_empty() {
        String::from("No significant characters available for interaction.")
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use storyloom_model::{ChatRole, ScriptedBackend};
    use storyloom_types::{SceneFragment, SceneTracker};

    use crate::knowledge::{FixedKnowledge, NoKnowledge};

    use super::*;

    fn test_prompts() -> Arc<PromptEngine> {
        let unique = format!(
            "storyloom_session_templates_{}_{:?}",
            std::process::id(),
            std::thread::current().id(),
        );
        let dir = std::env::temp_dir().join(unique);
        std::fs::create_dir_all(&dir).ok();
        for name in ["planner", "moderator", "offscreen"] {
            std::fs::write(dir.join(format!("{name}.j2")), "stub").ok();
        }
        std::fs::write(
            dir.join("character.j2"),
            "You are {{ name }}.\n{{ recent_memories }}\nPeriod: {{ time_period }}",
        )
        .ok();
        Arc::new(PromptEngine::new(dir.to_str().unwrap_or("")).unwrap())
    }

    fn deps_with(responses: Vec<String>) -> SessionDeps {
        SessionDeps {
            model: Arc::new(ModelClient::Scripted(ScriptedBackend::new(responses))),
            prompts: test_prompts(),
            knowledge: Arc::new(NoKnowledge),
            cancel: CancellationToken::new(),
        }
    }

    fn make_character(name: &str) -> CharacterRecord {
        CharacterRecord {
            name: name.to_owned(),
            ..CharacterRecord::default()
        }
    }

    fn input() -> CohortInput {
        CohortInput {
            period: String::from("until Day 4, dawn"),
            ..CohortInput::default()
        }
    }

    #[test]
    fn query_type_parses_case_insensitively() {
        assert_eq!(QueryType::from_str("intention"), Ok(QueryType::Intention));
        assert_eq!(QueryType::from_str("Response"), Ok(QueryType::Response));
        assert_eq!(QueryType::from_str("REFLECTION"), Ok(QueryType::Reflection));
        assert!(QueryType::from_str("monologue").is_err());
    }

    #[tokio::test]
    async fn identity_is_built_once_and_turns_append() {
        let deps = deps_with(vec![
            String::from("I plan to find Bob."),
            String::from("I refuse to back down."),
        ]);
        let mut session = CharacterSession::new(
            make_character("Alice"),
            &SimulationSettings::default(),
        );

        let first = session
            .invoke_query(&deps, &input(), QueryType::Intention, "", "What do you intend?")
            .await
            .unwrap();
        assert_eq!(first, "I plan to find Bob.");

        let system_count = session
            .conversation()
            .messages()
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .count();
        assert_eq!(system_count, 1);
        let len_after_first = session.conversation().len();

        let _second = session
            .invoke_query(
                &deps,
                &input(),
                QueryType::Response,
                "Bob confronts you",
                "How do you react?",
            )
            .await
            .unwrap();

        let system_count = session
            .conversation()
            .messages()
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .count();
        assert_eq!(system_count, 1, "identity is never rebuilt");
        assert!(session.conversation().len() > len_after_first);
        assert!(session
            .conversation()
            .system()
            .unwrap_or_default()
            .contains("You are Alice."));
    }

    #[tokio::test]
    async fn reflection_is_captured_via_tool_call() {
        let reflection = json!({
            "name": "submit_reflection",
            "arguments": {
                "scenes": [{
                    "story_tracker": {"time": "Day 3, night", "location": "Mill Road"},
                    "narrative": "I walked home in the rain.",
                    "memory": {"summary": "A cold walk home", "salience": 3.0}
                }]
            }
        });
        let deps = deps_with(vec![
            format!("<tool_call>{reflection}</tool_call>"),
            String::from("That is everything that happened."),
        ]);
        let mut session = CharacterSession::new(
            make_character("Alice"),
            &SimulationSettings::default(),
        );

        let prose = session
            .invoke_query(&deps, &input(), QueryType::Reflection, "", "Conclude your period.")
            .await
            .unwrap();

        assert_eq!(prose, "That is everything that happened.");
        let submitted = session.submitted_reflection().unwrap();
        assert_eq!(submitted.scenes.len(), 1);
    }

    #[tokio::test]
    async fn second_reflection_submission_is_refused() {
        let submit = "<tool_call>{\"name\": \"submit_reflection\", \"arguments\": {\"scenes\": []}}</tool_call>";
        let deps = deps_with(vec![
            submit.to_owned(),
            submit.to_owned(),
            String::from("Done."),
        ]);
        let mut session = CharacterSession::new(
            make_character("Alice"),
            &SimulationSettings::default(),
        );

        let _prose = session
            .invoke_query(&deps, &input(), QueryType::Reflection, "", "Conclude.")
            .await
            .unwrap();

        assert!(session.submitted_reflection().is_some());
        let refused = session
            .conversation()
            .messages()
            .iter()
            .any(|m| m.content.contains("cannot be submitted twice"));
        assert!(refused);
    }

    #[tokio::test]
    async fn knowledge_search_is_budgeted() {
        let search = "<tool_call>{\"name\": \"search_world_knowledge\", \"arguments\": {\"queries\": [\"the mill\"]}}</tool_call>";
        let settings = SimulationSettings {
            knowledge_budget: 1,
            ..SimulationSettings::default()
        };

        let deps = SessionDeps {
            model: Arc::new(ModelClient::Scripted(ScriptedBackend::new(vec![
                search.to_owned(),
                search.to_owned(),
                String::from("I remember the mill."),
            ]))),
            prompts: test_prompts(),
            knowledge: Arc::new(FixedKnowledge::new(["The mill burned down."])),
            cancel: CancellationToken::new(),
        };
        let mut session = CharacterSession::new(make_character("Alice"), &settings);

        let _prose = session
            .invoke_query(&deps, &input(), QueryType::Response, "", "What do you recall?")
            .await
            .unwrap();

        let messages = session.conversation().messages();
        assert!(messages
            .iter()
            .any(|m| m.content.contains("The mill burned down.")));
        assert!(messages
            .iter()
            .any(|m| m.content.contains("Maximum number of search_world_knowledge calls")));
    }

    #[tokio::test]
    async fn unknown_tool_gets_plain_notice() {
        let deps = deps_with(vec![
            String::from("<tool_call>{\"name\": \"cast_spell\", \"arguments\": {}}</tool_call>"),
            String::from("Fine, no spells."),
        ]);
        let mut session = CharacterSession::new(
            make_character("Alice"),
            &SimulationSettings::default(),
        );
        let prose = session
            .invoke_query(&deps, &input(), QueryType::Response, "", "Do something.")
            .await
            .unwrap();
        assert_eq!(prose, "Fine, no spells.");
        assert!(session
            .conversation()
            .messages()
            .iter()
            .any(|m| m.content.contains("Unknown tool 'cast_spell'")));
    }

    #[tokio::test]
    async fn cancelled_session_stops_at_call_boundary() {
        let deps = deps_with(vec![String::from("unused")]);
        deps.cancel.cancel();
        let mut session = CharacterSession::new(
            make_character("Alice"),
            &SimulationSettings::default(),
        );
        let result = session
            .invoke_query(&deps, &input(), QueryType::Intention, "", "What now?")
            .await;
        assert!(matches!(result, Err(SimulationError::Cancelled)));
    }

    #[test]
    fn scene_history_caps_at_limit() {
        let mut character = make_character("Alice");
        character.scene_fragments = (1..=25)
            .map(|i| SceneFragment {
                content: format!("Scene body {i}"),
                sequence: i,
                tracker: Some(SceneTracker {
                    time: format!("Day {i}"),
                    location: String::from("Town"),
                    ..SceneTracker::default()
                }),
            })
            .collect();

        let history = scene_history(&character, 20);
        assert!(!history.contains("Scene body 5"), "older scenes drop off");
        assert!(history.contains("Scene body 6"));
        assert!(history.contains("Scene body 25"));
    }

    #[test]
    fn user_message_formats() {
        let with_stimulus = build_user_message(QueryType::Response, "Bob shouts", "React.");
        assert!(with_stimulus.contains("**Stimulus:** Bob shouts"));
        assert!(with_stimulus.contains("**Query (Response):** React."));

        let without = build_user_message(QueryType::Intention, "  ", "Plans?");
        assert!(!without.contains("Stimulus"));
    }
}
