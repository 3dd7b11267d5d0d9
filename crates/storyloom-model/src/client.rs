//! Narrative model backend abstraction and implementations.
//!
//! Defines an enum-based dispatch for model backends, avoiding the
//! dyn-compatibility issues with async trait methods. Concrete
//! implementations exist for OpenAI-compatible APIs and the Anthropic
//! Messages API, both over HTTP via `reqwest`, plus a scripted backend that
//! replays canned responses for tests.
//!
//! The scheduler does not care which model is behind the API -- it sends a
//! conversation and expects free text containing one tagged structured
//! block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::conversation::{ChatRole, Conversation};
use crate::error::ModelError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Supported model backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// OpenAI-compatible chat completions API (works with `OpenAI`,
    /// `DeepSeek`, and Ollama endpoints).
    OpenAi,
    /// Anthropic Messages API (different request format).
    Anthropic,
}

/// Configuration for a single model backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// The backend type.
    pub backend_type: BackendType,
    /// Base API URL (e.g. `https://api.openai.com/v1`).
    pub api_url: String,
    /// API key for authentication.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Maximum tokens per response.
    pub max_tokens: u32,
}

impl BackendConfig {
    /// Load a backend config from a set of prefixed environment variables.
    ///
    /// Required variables (for prefix `MODEL`): `MODEL_BACKEND`,
    /// `MODEL_API_URL`, `MODEL_API_KEY`, `MODEL_NAME`. Optional:
    /// `MODEL_MAX_TOKENS` (default 4096).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Config`] when a required variable is missing
    /// or the backend type is unknown.
    pub fn from_env(prefix: &str) -> Result<Self, ModelError> {
        let backend_str = env_var(&format!("{prefix}_BACKEND"))?;
        let api_url = env_var(&format!("{prefix}_API_URL"))?;
        let api_key = env_var(&format!("{prefix}_API_KEY"))?;
        let model = env_var(&format!("{prefix}_NAME"))?;

        let max_tokens: u32 = std::env::var(format!("{prefix}_MAX_TOKENS"))
            .unwrap_or_else(|_| "4096".to_owned())
            .parse()
            .map_err(|e| ModelError::Config(format!("invalid {prefix}_MAX_TOKENS: {e}")))?;

        let backend_type = match backend_str.to_lowercase().as_str() {
            "openai" | "deepseek" | "ollama" => BackendType::OpenAi,
            "anthropic" | "claude" => BackendType::Anthropic,
            other => {
                return Err(ModelError::Config(format!(
                    "unknown backend type: {other}"
                )))
            }
        };

        Ok(Self {
            backend_type,
            api_url,
            api_key,
            model,
            max_tokens,
        })
    }
}

/// Read a required environment variable.
fn env_var(name: &str) -> Result<String, ModelError> {
    std::env::var(name)
        .map_err(|e| ModelError::Config(format!("missing required env var {name}: {e}")))
}

// ---------------------------------------------------------------------------
// Unified backend enum (dyn-compatible alternative to async trait)
// ---------------------------------------------------------------------------

/// A narrative model backend that can process a conversation and return a
/// text response.
///
/// Uses enum dispatch instead of trait objects because async methods are
/// not dyn-compatible in Rust.
pub enum ModelClient {
    /// OpenAI-compatible chat completions API.
    OpenAi(OpenAiBackend),
    /// Anthropic Messages API.
    Anthropic(AnthropicBackend),
    /// Canned responses for tests; counts calls.
    Scripted(ScriptedBackend),
}

impl ModelClient {
    /// Send a conversation to the model and return the response text.
    ///
    /// Dispatches to the concrete backend implementation.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Backend`] if the call fails or the response
    /// cannot be extracted.
    pub async fn complete(&self, conversation: &Conversation) -> Result<String, ModelError> {
        match self {
            Self::OpenAi(backend) => backend.complete(conversation).await,
            Self::Anthropic(backend) => backend.complete(conversation).await,
            Self::Scripted(backend) => backend.complete(conversation),
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::OpenAi(_) => "openai-compatible",
            Self::Anthropic(_) => "anthropic",
            Self::Scripted(_) => "scripted",
        }
    }

    /// Total completed calls (all backends count; tests assert on this).
    pub fn calls(&self) -> usize {
        match self {
            Self::OpenAi(backend) => backend.calls.load(Ordering::SeqCst),
            Self::Anthropic(backend) => backend.calls.load(Ordering::SeqCst),
            Self::Scripted(backend) => backend.calls(),
        }
    }
}

/// Create a model client from configuration.
///
/// Dispatches to [`OpenAiBackend`] or [`AnthropicBackend`] based on the
/// configured [`BackendType`].
pub fn create_client(config: &BackendConfig) -> ModelClient {
    match config.backend_type {
        BackendType::OpenAi => ModelClient::OpenAi(OpenAiBackend::new(config)),
        BackendType::Anthropic => ModelClient::Anthropic(AnthropicBackend::new(config)),
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible backend
// ---------------------------------------------------------------------------

/// Backend for OpenAI-compatible chat completions APIs.
///
/// Sends requests to `{api_url}/chat/completions`.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    calls: AtomicUsize,
}

impl OpenAiBackend {
    /// Create a new OpenAI-compatible backend.
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            calls: AtomicUsize::new(0),
        }
    }

    /// Send a conversation and return the response text.
    async fn complete(&self, conversation: &Conversation) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.api_url);

        let messages: Vec<serde_json::Value> = conversation
            .messages()
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": role_name(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.7,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Backend(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(ModelError::Backend(format!(
                "OpenAI returned {status}: {error_body}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Backend(format!("OpenAI response parse failed: {e}")))?;

        self.calls.fetch_add(1, Ordering::SeqCst);
        extract_openai_content(&json)
    }
}

/// Map a chat role to the OpenAI wire name.
const fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

/// Extract the text content from an OpenAI chat completions response.
fn extract_openai_content(json: &serde_json::Value) -> Result<String, ModelError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            ModelError::Backend("OpenAI response missing choices[0].message.content".to_owned())
        })
}

// ---------------------------------------------------------------------------
// Anthropic Messages API backend
// ---------------------------------------------------------------------------

/// Backend for the Anthropic Messages API.
///
/// Anthropic uses a different request format from OpenAI:
/// - Uses `x-api-key` header instead of `Authorization: Bearer`
/// - The system message is a top-level field, not part of the messages array
/// - Response structure differs: `content[0].text`
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    calls: AtomicUsize,
}

impl AnthropicBackend {
    /// Create a new Anthropic Messages API backend.
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            calls: AtomicUsize::new(0),
        }
    }

    /// Send a conversation and return the response text.
    async fn complete(&self, conversation: &Conversation) -> Result<String, ModelError> {
        let url = format!("{}/messages", self.api_url);

        let system = conversation.system().unwrap_or_default();
        let messages: Vec<serde_json::Value> = conversation
            .messages()
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| {
                serde_json::json!({
                    "role": role_name(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": messages,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Backend(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(ModelError::Backend(format!(
                "Anthropic returned {status}: {error_body}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Backend(format!("Anthropic response parse failed: {e}")))?;

        self.calls.fetch_add(1, Ordering::SeqCst);
        extract_anthropic_content(&json)
    }
}

/// Extract the text content from an Anthropic Messages API response.
fn extract_anthropic_content(json: &serde_json::Value) -> Result<String, ModelError> {
    json.get("content")
        .and_then(|c| c.get(0))
        .and_then(|b| b.get("text"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| ModelError::Backend("Anthropic response missing content[0].text".to_owned()))
}

// ---------------------------------------------------------------------------
// Scripted backend (tests)
// ---------------------------------------------------------------------------

/// A backend that replays a fixed queue of responses and counts calls.
///
/// Backs the scheduler's tests: memoization tests assert zero additional
/// calls, retry tests assert exactly two, and scripted responses exercise
/// the tool-loop and extraction paths without any network.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Create a backend that will return the given responses in order.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Append another canned response to the queue.
    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response.into());
        }
    }

    /// Number of completed calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Pop the next canned response.
    fn complete(&self, _conversation: &Conversation) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .map_err(|_| ModelError::Backend("scripted backend lock poisoned".to_owned()))?
            .pop_front()
            .ok_or_else(|| ModelError::Backend("scripted backend exhausted".to_owned()))
    }
}
