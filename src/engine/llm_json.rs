// Strict JSON handling for classifier replies.
// Policy: strip a markdown code fence if present, then parse strictly.
// No repairs, no retries — callers degrade to their neutral value on failure.

use crate::atoms::error::{EngineError, EngineResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Strip one surrounding markdown code fence (``` or ```json) if present.
/// Anything else is returned trimmed but untouched.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", …) up to the first newline.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Strict parse into a typed value after fence stripping.
pub fn parse_strict<T: DeserializeOwned>(text: &str) -> EngineResult<T> {
    let cleaned = strip_code_fences(text);
    serde_json::from_str(cleaned)
        .map_err(|e| EngineError::bad_input(format!("strict JSON parse failed: {e}")))
}

/// Strict parse into a dynamic value after fence stripping.
pub fn parse_value(text: &str) -> EngineResult<Value> {
    parse_strict(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_passes_through() {
        let v = parse_value("{\"a\": 1}").unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn fenced_json_is_stripped() {
        let v = parse_value("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(v, json!({"a": 1}));

        let v = parse_value("```\n[1, 2]\n```").unwrap();
        assert_eq!(v, json!([1, 2]));
    }

    #[test]
    fn freeform_prose_is_rejected_not_repaired() {
        let err = parse_value("Sure! Here is the JSON: {\"a\": 1}").unwrap_err();
        assert!(err.to_string().contains("strict JSON parse failed"));
    }

    #[test]
    fn typed_parse() {
        #[derive(serde::Deserialize)]
        struct Probe {
            a: i32,
        }
        let p: Probe = parse_strict("```json\n{\"a\": 7}\n```").unwrap();
        assert_eq!(p.a, 7);
    }
}
