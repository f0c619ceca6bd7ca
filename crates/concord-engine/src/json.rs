//! Extraction of structured answers from model output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

static JSON_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)```").unwrap());
static ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\n?(.*?)```").unwrap());

/// The JSON payload of a model answer: the first ```` ```json ```` block,
/// else the first fenced block, else the whole text.
#[must_use]
pub fn extract_json_block(text: &str) -> &str {
    JSON_FENCE
        .captures(text)
        .or_else(|| ANY_FENCE.captures(text))
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str())
        .trim()
}

/// Deserialize the JSON payload of a model answer.
///
/// # Errors
///
/// The `serde_json` error when the payload is not a valid `T`.
pub fn parse_json_answer<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json_block(text))
}

/// Plain-text answer with an optional surrounding fence removed.
#[must_use]
pub fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        ANY_FENCE
            .captures(trimmed)
            .and_then(|c| c.get(1))
            .map_or(trimmed, |m| m.as_str().trim_end_matches('\n'))
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_prefers_json_fence() {
        let text = "```\nnot this\n```\nthen\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_block(text), "{\"a\": 1}");
    }

    #[test]
    fn test_falls_back_to_plain_fence_then_text() {
        assert_eq!(extract_json_block("x\n```\n[1]\n```"), "[1]");
        assert_eq!(extract_json_block("  {\"b\": true} "), "{\"b\": true}");
    }

    #[test]
    fn test_parse_json_answer() {
        let value: Value = parse_json_answer("Sure:\n```json\n{\"type\": \"finish\"}\n```").unwrap();
        assert_eq!(value["type"], "finish");
        assert!(parse_json_answer::<Value>("no json here").is_err());
    }

    #[test]
    fn test_strip_fence() {
        assert_eq!(strip_fence("```markdown\nNew text.\n```"), "New text.");
        assert_eq!(strip_fence("  plain  "), "plain");
    }
}
