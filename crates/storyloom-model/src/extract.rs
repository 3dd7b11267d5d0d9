//! Tag-delimited typed extraction from model-authored text.
//!
//! The narrative model returns free text containing exactly one tagged
//! structured block (`<simulation_plan>{...}</simulation_plan>`). This module
//! extracts the block by tag name, tolerant of surrounding prose, and parses
//! it into a typed value. A missing or unparseable tag is a contract
//! violation surfaced as a typed [`ExtractError`] so callers can run their
//! bounded corrective retry.
//!
//! Recovery strategies applied before parsing:
//! 1. Strip `<think>...</think>` reasoning blocks
//! 2. Extract the tag body, or fall back to the whole response when the tag
//!    is absent but the text still parses
//! 3. Strip markdown code fences
//! 4. Strip trailing commas and retry

use serde::de::DeserializeOwned;

/// Errors raised when a tagged structured block cannot be extracted.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The named tag was not found and the response was not bare JSON.
    #[error("missing <{tag}> block in model response")]
    MissingTag {
        /// The tag that was expected.
        tag: String,
    },

    /// The tag body (or bare response) was not valid JSON for the target
    /// type.
    #[error("unparseable <{tag}> block: {reason}")]
    Unparseable {
        /// The tag that was expected.
        tag: String,
        /// The underlying parse failure.
        reason: String,
    },
}

impl ExtractError {
    /// Feedback text suitable for a corrective retry turn.
    pub fn corrective_feedback(&self) -> String {
        match self {
            Self::MissingTag { tag } => format!(
                "Your previous response did not contain a <{tag}> block. \
                 Respond again and place the JSON output inside a single \
                 <{tag}>...</{tag}> tag."
            ),
            Self::Unparseable { tag, reason } => format!(
                "The JSON inside your <{tag}> block failed to parse: {reason}. \
                 Respond again with corrected JSON inside a single \
                 <{tag}>...</{tag}> tag."
            ),
        }
    }
}

/// Extract the raw body of the first `<tag>...</tag>` block, if present.
pub fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)?;
    let body_start = start.checked_add(open.len())?;
    let remaining = text.get(body_start..)?;
    let end = remaining.find(&close)?;
    remaining.get(..end).map(str::trim)
}

/// Extract and parse the tagged JSON block into `T`.
///
/// When the tag is absent, falls back to treating the whole (sanitized)
/// response as the JSON payload before giving up -- smaller models sometimes
/// drop the tag but still answer with clean JSON.
///
/// # Errors
///
/// Returns [`ExtractError::MissingTag`] when neither the tag nor a bare JSON
/// body is present, or [`ExtractError::Unparseable`] when the located body
/// fails to parse after all recovery strategies.
pub fn extract_tagged_json<T: DeserializeOwned>(text: &str, tag: &str) -> Result<T, ExtractError> {
    let sanitized = strip_think_blocks(text);

    if let Some(body) = extract_tag(&sanitized, tag) {
        return parse_with_recovery(body).map_err(|reason| ExtractError::Unparseable {
            tag: tag.to_owned(),
            reason,
        });
    }

    // Fallback: the whole response may be the bare JSON payload.
    let trimmed = sanitized.trim();
    let candidate = extract_fenced(trimmed).unwrap_or(trimmed);
    if candidate.starts_with('{') || candidate.starts_with('[') {
        return parse_with_recovery(candidate).map_err(|reason| ExtractError::Unparseable {
            tag: tag.to_owned(),
            reason,
        });
    }

    Err(ExtractError::MissingTag {
        tag: tag.to_owned(),
    })
}

/// Parse a JSON body through the recovery chain.
fn parse_with_recovery<T: DeserializeOwned>(body: &str) -> Result<T, String> {
    let unfenced = extract_fenced(body).unwrap_or(body).trim();

    // Strategy 1: direct parse
    let direct = serde_json::from_str::<T>(unfenced);
    let first_err = match direct {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    // Strategy 2: strip trailing commas and retry
    let cleaned = strip_trailing_commas(unfenced);
    if let Ok(value) = serde_json::from_str::<T>(&cleaned) {
        return Ok(value);
    }

    Err(first_err.to_string())
}

/// Remove `<think>...</think>` reasoning blocks some models emit.
fn strip_think_blocks(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        result.push_str(rest.get(..start).unwrap_or(""));
        let after_open = start.checked_add("<think>".len()).unwrap_or(start);
        let Some(tail) = rest.get(after_open..) else {
            return result;
        };
        if let Some(end) = tail.find("</think>") {
            let after_close = end.checked_add("</think>".len()).unwrap_or(end);
            rest = tail.get(after_close..).unwrap_or("");
        } else {
            // Unterminated think block: drop everything after it.
            return result;
        }
    }
    result.push_str(rest);
    result
}

/// Extract the body of a markdown code fence, if the text contains one.
fn extract_fenced(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_tick = start.checked_add(3)?;
    let tail = text.get(after_tick..)?;
    // Skip the language hint line, if any.
    let body_start = tail.find('\n').and_then(|nl| nl.checked_add(1))?;
    let body = tail.get(body_start..)?;
    let end = body.find("```")?;
    body.get(..end).map(str::trim)
}

/// Strip trailing commas before closing braces and brackets (common model
/// output error).
fn strip_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    let mut i = 0;
    while i < len {
        let c = chars.get(i).copied().unwrap_or(' ');
        if c == ',' {
            // Look ahead past whitespace for } or ]
            let mut j = i.checked_add(1).unwrap_or(i);
            while j < len && chars.get(j).copied().unwrap_or(' ').is_whitespace() {
                j = j.checked_add(1).unwrap_or(j);
            }
            let next = chars.get(j).copied().unwrap_or(' ');
            if next == '}' || next == ']' {
                // Skip this comma
                i = i.checked_add(1).unwrap_or(i);
                continue;
            }
        }
        result.push(c);
        i = i.checked_add(1).unwrap_or(len);
    }

    result
}
