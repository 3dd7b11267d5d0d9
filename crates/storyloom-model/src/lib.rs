//! Narrative model collaborator plumbing for the Storyloom scheduler.
//!
//! The scheduler drives every external model interaction through this
//! crate: append-only conversation logs, backend dispatch over HTTP (or
//! scripted replay in tests), tag-delimited typed extraction of structured
//! blocks from free text, the bounded retry-with-feedback state machine, the
//! prompt template engine, and the tool-call text protocol with per-session
//! budgets.
//!
//! # Modules
//!
//! - [`conversation`] -- Append-only chat logs (system/user/assistant)
//! - [`client`] -- Enum-dispatch model backends (OpenAI, Anthropic, scripted)
//! - [`extract`] -- Tagged structured-block extraction with recovery
//! - [`retry`] -- Bounded retry-with-feedback state machine
//! - [`prompt`] -- `minijinja` template loading and rendering
//! - [`tools`] -- Tool descriptors, calls, and per-session budgets
//! - [`error`] -- [`ModelError`]
//!
//! [`ModelError`]: error::ModelError

pub mod client;
pub mod conversation;
pub mod error;
pub mod extract;
pub mod prompt;
pub mod retry;
pub mod tools;

pub use client::{create_client, BackendConfig, BackendType, ModelClient, ScriptedBackend};
pub use conversation::{ChatMessage, ChatRole, Conversation};
pub use error::ModelError;
pub use extract::{extract_tag, extract_tagged_json, ExtractError};
pub use prompt::PromptEngine;
pub use retry::{RetryDecision, RetryState};
pub use tools::{render_tool_listing, ToolBudget, ToolCall, ToolDescriptor, ToolParam};
