//! Parsing helpers for model responses
//!
//! Models wrap JSON in markdown fences, add prose around it, and produce the
//! occasional trailing comma or smart quote. These helpers clean that up
//! before deserialization; anything still invalid surfaces as a typed
//! [`ParseFailure`] rather than an opaque error.

use crate::provider::truncate_str;
use serde::de::DeserializeOwned;

/// Typed failure for schema-validated parsing of model output.
#[derive(Debug, thiserror::Error)]
#[error("model response could not be parsed: {reason} (preview: {preview})")]
pub struct ParseFailure {
    pub reason: String,
    pub preview: String,
}

/// Strip markdown code fences from a response.
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if trimmed.starts_with("```json") {
        trimmed.strip_prefix("```json").unwrap_or(trimmed)
    } else if trimmed.starts_with("```") {
        trimmed.strip_prefix("```").unwrap_or(trimmed)
    } else {
        trimmed
    };
    let clean = if clean.ends_with("```") {
        clean.strip_suffix("```").unwrap_or(clean)
    } else {
        clean
    };
    clean.trim()
}

/// Extract a JSON fragment between matching delimiters.
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Fix common JSON issues from model responses.
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Trailing commas before ] or }
    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    // Smart quotes to regular quotes
    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");

    // Control characters that slipped in
    fixed = fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    fixed
}

/// Parse a model response against an expected JSON object shape.
///
/// Strips fences, extracts the outermost object, and retries once after
/// repairing common syntax issues.
pub fn parse_structured<T: DeserializeOwned>(response: &str) -> Result<T, ParseFailure> {
    let clean = strip_markdown_fences(response);
    let json_str = extract_json_fragment(clean, '{', '}').ok_or_else(|| ParseFailure {
        reason: "no JSON object found".to_string(),
        preview: truncate_str(clean, 200).to_string(),
    })?;

    match serde_json::from_str(json_str) {
        Ok(parsed) => Ok(parsed),
        Err(initial_error) => {
            let fixed = fix_json_issues(json_str);
            serde_json::from_str(&fixed).map_err(|_| ParseFailure {
                reason: initial_error.to_string(),
                preview: truncate_str(json_str, 200).to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Shape {
        name: String,
        count: u32,
    }

    #[test]
    fn test_parse_plain_json() {
        let parsed: Shape = parse_structured(r#"{"name": "a", "count": 3}"#).unwrap();
        assert_eq!(parsed.name, "a");
        assert_eq!(parsed.count, 3);
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let response = "Here you go:\n```json\n{\"name\": \"b\", \"count\": 1}\n```";
        let parsed: Shape = parse_structured(response).unwrap();
        assert_eq!(parsed.name, "b");
    }

    #[test]
    fn test_parse_repairs_trailing_comma() {
        let parsed: Shape = parse_structured(r#"{"name": "c", "count": 2,}"#).unwrap();
        assert_eq!(parsed.count, 2);
    }

    #[test]
    fn test_parse_failure_carries_preview() {
        let err = parse_structured::<Shape>("no braces here").unwrap_err();
        assert!(err.reason.contains("no JSON object"));
        assert!(err.preview.contains("no braces"));
    }

    #[test]
    fn test_strip_markdown_fences() {
        assert_eq!(strip_markdown_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_markdown_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_markdown_fences("{}"), "{}");
    }
}
