//! Error types for the model plumbing.
//!
//! Uses `thiserror` for typed errors that surface through the conversation
//! pipeline: backend calls, prompt rendering, tag extraction.

/// Errors that can occur while talking to the narrative model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A model backend returned an error or was unreachable.
    #[error("model backend error: {0}")]
    Backend(String),

    /// Failed to render a prompt template.
    #[error("template render error: {0}")]
    Template(String),

    /// The response did not contain the expected tagged structured block.
    #[error(transparent)]
    Extract(#[from] crate::extract::ExtractError),

    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
