//! Configuration loading and typed settings for the scheduler.
//!
//! The canonical configuration lives in `storyloom.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure and provides a loader that reads the file. The
//! `STORYLOOM_TEMPLATES_DIR` environment variable overrides the templates
//! directory for deployments that mount prompt templates elsewhere.

use std::path::Path;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Scheduler settings.
///
/// All fields have defaults matching the behavior described in the design
/// documents: one corrective retry everywhere, tool budgets in the 5-10
/// band, and bounded moderation loops.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulationSettings {
    /// Directory containing `planner.j2`, `moderator.j2`, `character.j2`,
    /// and `offscreen.j2`.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,

    /// Maximum driver-loop turns for the planner's tool phase.
    #[serde(default = "default_planner_turn_budget")]
    pub planner_turn_budget: u32,

    /// Maximum driver-loop turns for one cohort moderation pass.
    #[serde(default = "default_moderator_turn_budget")]
    pub moderator_turn_budget: u32,

    /// Maximum driver-loop turns for the nudge retry after an incomplete
    /// reflection set.
    #[serde(default = "default_nudge_turn_budget")]
    pub nudge_turn_budget: u32,

    /// Maximum driver-loop turns inside one character query.
    #[serde(default = "default_session_turn_budget")]
    pub session_turn_budget: u32,

    /// `check_intent` calls allowed per planning session.
    #[serde(default = "default_intent_check_budget")]
    pub intent_check_budget: u32,

    /// `query_character` calls allowed per moderation session.
    #[serde(default = "default_query_character_budget")]
    pub query_character_budget: u32,

    /// `search_world_knowledge` calls allowed per character session.
    #[serde(default = "default_knowledge_budget")]
    pub knowledge_budget: u32,

    /// How many recent scene fragments seed a character's identity context.
    #[serde(default = "default_recent_fragment_limit")]
    pub recent_fragment_limit: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            templates_dir: default_templates_dir(),
            planner_turn_budget: default_planner_turn_budget(),
            moderator_turn_budget: default_moderator_turn_budget(),
            nudge_turn_budget: default_nudge_turn_budget(),
            session_turn_budget: default_session_turn_budget(),
            intent_check_budget: default_intent_check_budget(),
            query_character_budget: default_query_character_budget(),
            knowledge_budget: default_knowledge_budget(),
            recent_fragment_limit: default_recent_fragment_limit(),
        }
    }
}

impl SimulationSettings {
    /// Load settings from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut settings: Self = serde_yml::from_str(yaml)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("STORYLOOM_TEMPLATES_DIR") {
            self.templates_dir = dir;
        }
    }
}

fn default_templates_dir() -> String {
    String::from("templates")
}

const fn default_planner_turn_budget() -> u32 {
    8
}

const fn default_moderator_turn_budget() -> u32 {
    12
}

const fn default_nudge_turn_budget() -> u32 {
    4
}

const fn default_session_turn_budget() -> u32 {
    6
}

const fn default_intent_check_budget() -> u32 {
    8
}

const fn default_query_character_budget() -> u32 {
    10
}

const fn default_knowledge_budget() -> u32 {
    8
}

const fn default_recent_fragment_limit() -> usize {
    20
}
