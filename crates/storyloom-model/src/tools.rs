//! Tool surface exposed to the narrative model.
//!
//! Tools are a text protocol: descriptors are rendered into the context
//! message so the model knows what it may call, and the model invokes a tool
//! by emitting a `<tool_call>` block containing `{"name": ..., "arguments":
//! {...}}`. Each session enforces a fixed call budget per tool; exceeding it
//! returns an explicit "budget exhausted" text response rather than an
//! error.

use serde::{Deserialize, Serialize};

use crate::extract::{extract_tag, ExtractError};

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParam {
    /// Parameter name as it appears in the arguments object.
    pub name: String,
    /// What the model should put there.
    pub description: String,
}

/// Description of one tool available to the model during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name as it appears in `tool_call.name`.
    pub name: String,
    /// What the tool does and when to use it.
    pub description: String,
    /// The tool's parameters.
    pub params: Vec<ToolParam>,
}

impl ToolDescriptor {
    /// Build a descriptor from name, description, and `(param, description)`
    /// pairs.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        params: &[(&str, &str)],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: params
                .iter()
                .map(|(n, d)| ToolParam {
                    name: (*n).to_owned(),
                    description: (*d).to_owned(),
                })
                .collect(),
        }
    }
}

/// Render a tool listing for inclusion in a context message.
///
/// The listing spells out the `<tool_call>` invocation protocol once, then
/// one block per tool with its parameters.
pub fn render_tool_listing(tools: &[ToolDescriptor]) -> String {
    let mut out = String::from(
        "## Available Tools\n\
         Invoke a tool by responding with a single block:\n\
         <tool_call>{\"name\": \"<tool_name>\", \"arguments\": {...}}</tool_call>\n\
         The tool result will be provided in the next message.\n",
    );
    for tool in tools {
        out.push_str(&format!("\n### {}\n{}\n", tool.name, tool.description));
        for param in &tool.params {
            out.push_str(&format!("- `{}`: {}\n", param.name, param.description));
        }
    }
    out
}

/// A tool invocation parsed from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool being invoked.
    pub name: String,
    /// Arguments object.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Parse a `<tool_call>` block out of a model response, if present.
    ///
    /// Returns `None` when the response contains no `<tool_call>` tag;
    /// returns an error when the tag is present but its body is not a valid
    /// invocation object.
    pub fn from_response(text: &str) -> Result<Option<Self>, ExtractError> {
        let Some(body) = extract_tag(text, "tool_call") else {
            return Ok(None);
        };
        serde_json::from_str::<Self>(body)
            .map(Some)
            .map_err(|e| ExtractError::Unparseable {
                tag: String::from("tool_call"),
                reason: e.to_string(),
            })
    }

    /// Read a required string argument.
    pub fn string_arg(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(serde_json::Value::as_str)
    }
}

/// Per-session call budget for one tool.
///
/// Exhaustion is not an error: the session keeps running and the model gets
/// a plain-text refusal instead of the tool result.
#[derive(Debug, Clone)]
pub struct ToolBudget {
    tool_name: String,
    limit: u32,
    used: u32,
}

impl ToolBudget {
    /// Create a budget of `limit` calls for the named tool.
    pub fn new(tool_name: impl Into<String>, limit: u32) -> Self {
        Self {
            tool_name: tool_name.into(),
            limit,
            used: 0,
        }
    }

    /// Try to consume one call. Returns `true` when the call is within
    /// budget.
    pub fn try_consume(&mut self) -> bool {
        if self.used < self.limit {
            self.used = self.used.saturating_add(1);
            true
        } else {
            false
        }
    }

    /// Calls consumed so far.
    pub const fn used(&self) -> u32 {
        self.used
    }

    /// The plain-text refusal returned once the budget is spent.
    pub fn exhausted_notice(&self) -> String {
        format!(
            "Maximum number of {} calls ({}) reached. You cannot make more \
             {} calls this session.",
            self.tool_name, self.limit, self.tool_name
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tool_listing_includes_protocol_and_params() {
        let tools = vec![ToolDescriptor::new(
            "query_character",
            "Query a character for their response to a situation.",
            &[
                ("character", "Character name (exact match)"),
                ("query_type", "'intention', 'response', or 'reflection'"),
            ],
        )];
        let listing = render_tool_listing(&tools);
        assert!(listing.contains("<tool_call>"));
        assert!(listing.contains("### query_character"));
        assert!(listing.contains("`query_type`"));
    }

    #[test]
    fn parses_tool_call_from_response() {
        let text = r#"I need to hear from Alice first.

<tool_call>{"name": "query_character", "arguments": {"character": "Alice", "query_type": "intention"}}</tool_call>"#;
        let call = ToolCall::from_response(text).unwrap().unwrap();
        assert_eq!(call.name, "query_character");
        assert_eq!(call.string_arg("character"), Some("Alice"));
        assert_eq!(call.string_arg("missing"), None);
    }

    #[test]
    fn no_tool_call_tag_is_none() {
        let text = "The simulation is complete.";
        assert!(ToolCall::from_response(text).unwrap().is_none());
    }

    #[test]
    fn malformed_tool_call_is_error() {
        let text = "<tool_call>not json</tool_call>";
        assert!(ToolCall::from_response(text).is_err());
    }

    #[test]
    fn budget_allows_limit_then_refuses() {
        let mut budget = ToolBudget::new("search_world_knowledge", 2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.used(), 2);
        assert!(budget.exhausted_notice().contains("search_world_knowledge"));
        assert!(budget.exhausted_notice().contains('2'));
    }

    #[test]
    fn tool_call_arguments_default_to_null() {
        let call: ToolCall = serde_json::from_value(json!({"name": "submit_reflection"})).unwrap();
        assert_eq!(call.name, "submit_reflection");
        assert!(call.arguments.is_null());
    }
}
