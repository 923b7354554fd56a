//! Comparison result record and the extractor that repairs model output into it.
//!
//! The model is told to answer with a JSON object holding five string fields,
//! but nothing guarantees it does. `extract` finds the embedded object and fills
//! every field that is not a non-empty string with a fixed fallback, so callers
//! always get a complete record.

use crate::error::AppError;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const FALLBACK_SIMILARITY: &str = "0%";
pub const FALLBACK_PATTERNS: &str = "No se identificaron patrones";
pub const FALLBACK_SIMILARITIES: &str = "No se encontraron similitudes";
pub const FALLBACK_DIFFERENCES: &str = "No se encontraron diferencias";
pub const FALLBACK_RELIABILITY: &str = "No se pudo evaluar la confiabilidad";

/// Five-field outcome of comparing a user response with the model's response.
///
/// Every field is non-empty. Fields are private; the only way to build one is
/// [`ComparisonResult::from_object`] (directly or through [`extract`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    similarity_percentage: String,
    patterns: String,
    similarities: String,
    differences: String,
    reliability: String,
}

impl ComparisonResult {
    /// Apply the per-field rule: keep a value iff it is a string with length > 0.
    pub fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            similarity_percentage: field(object, "similarityPercentage", FALLBACK_SIMILARITY),
            patterns: field(object, "patterns", FALLBACK_PATTERNS),
            similarities: field(object, "similarities", FALLBACK_SIMILARITIES),
            differences: field(object, "differences", FALLBACK_DIFFERENCES),
            reliability: field(object, "reliability", FALLBACK_RELIABILITY),
        }
    }

    pub fn similarity_percentage(&self) -> &str {
        &self.similarity_percentage
    }

    pub fn patterns(&self) -> &str {
        &self.patterns
    }

    pub fn similarities(&self) -> &str {
        &self.similarities
    }

    pub fn differences(&self) -> &str {
        &self.differences
    }

    pub fn reliability(&self) -> &str {
        &self.reliability
    }
}

fn field(object: &Map<String, Value>, key: &str, fallback: &str) -> String {
    match object.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        other => {
            warn!("Comparison field '{}' missing or empty ({:?}), using fallback", key, other);
            fallback.to_string()
        }
    }
}

/// Slice from the first `{` to the last `}` inclusive, or the whole text when
/// no such pair exists.
pub fn locate_json_object(raw: &str) -> &str {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start <= end => &raw[start..=end],
        _ => raw,
    }
}

/// Parse raw model text into a complete [`ComparisonResult`].
///
/// Fails with [`AppError::MalformedUpstreamOutput`] when the located candidate
/// is not a JSON object.
pub fn extract(raw: &str) -> Result<ComparisonResult, AppError> {
    let candidate = locate_json_object(raw);
    debug!("Extracting comparison from {} of {} chars", candidate.len(), raw.len());

    let value: Value = serde_json::from_str(candidate).map_err(|e| {
        AppError::MalformedUpstreamOutput(format!(
            "invalid JSON ({}): {}",
            e,
            candidate.chars().take(200).collect::<String>()
        ))
    })?;

    match value {
        Value::Object(object) => Ok(ComparisonResult::from_object(&object)),
        other => Err(AppError::MalformedUpstreamOutput(format!(
            "expected a JSON object, got {}",
            other.to_string().chars().take(200).collect::<String>()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEYS: [(&str, &str); 5] = [
        ("similarityPercentage", FALLBACK_SIMILARITY),
        ("patterns", FALLBACK_PATTERNS),
        ("similarities", FALLBACK_SIMILARITIES),
        ("differences", FALLBACK_DIFFERENCES),
        ("reliability", FALLBACK_RELIABILITY),
    ];

    fn as_map(result: &ComparisonResult) -> Map<String, Value> {
        match serde_json::to_value(result).unwrap() {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_complete_object_passes_through() {
        let raw = r#"{"similarityPercentage":"72%","patterns":"p","similarities":"s","differences":"d","reliability":"r"}"#;
        let result = extract(raw).unwrap();
        assert_eq!(result.similarity_percentage(), "72%");
        assert_eq!(result.patterns(), "p");
        assert_eq!(result.similarities(), "s");
        assert_eq!(result.differences(), "d");
        assert_eq!(result.reliability(), "r");
    }

    #[test]
    fn test_each_key_independently() {
        // For every subset of the five keys, present keys pass through and the rest fall back.
        for mask in 0u32..32 {
            let mut object = Map::new();
            for (i, (key, _)) in KEYS.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    object.insert(key.to_string(), json!(format!("valor {}", key)));
                }
            }
            let result = as_map(&extract(&Value::Object(object).to_string()).unwrap());
            for (i, (key, fallback)) in KEYS.iter().enumerate() {
                let expected = if mask & (1 << i) != 0 {
                    format!("valor {}", key)
                } else {
                    fallback.to_string()
                };
                assert_eq!(result[*key], json!(expected), "mask {mask:05b} key {key}");
            }
        }
    }

    #[test]
    fn test_falsy_values_fall_back() {
        let raw = json!({
            "similarityPercentage": 80,
            "patterns": "",
            "similarities": null,
            "differences": false,
            "reliability": ["x"]
        })
        .to_string();
        let result = as_map(&extract(&raw).unwrap());
        for (key, fallback) in KEYS {
            assert_eq!(result[key], json!(fallback));
        }
    }

    #[test]
    fn test_no_disponible_kept_verbatim() {
        let result = extract(r#"{"patterns": "No disponible"}"#).unwrap();
        assert_eq!(result.patterns(), "No disponible");
        assert_eq!(result.reliability(), FALLBACK_RELIABILITY);
    }

    #[test]
    fn test_embedded_object_with_commentary() {
        let raw = "Here is the result: {\"patterns\": \"a {nested} brace\", \"similarityPercentage\": \"40%\"} Thanks";
        let result = extract(raw).unwrap();
        assert_eq!(result.patterns(), "a {nested} brace");
        assert_eq!(result.similarity_percentage(), "40%");
    }

    #[test]
    fn test_markdown_fenced_object() {
        let raw = "```json\n{\"differences\": \"d\"}\n```";
        assert_eq!(extract(raw).unwrap().differences(), "d");
    }

    #[test]
    fn test_locate_degenerate_cases() {
        assert_eq!(locate_json_object("no braces"), "no braces");
        assert_eq!(locate_json_object("only { open"), "only { open");
        assert_eq!(locate_json_object("} reversed {"), "} reversed {");
        assert_eq!(locate_json_object("x {} y"), "{}");
    }

    #[test]
    fn test_unparsable_is_malformed() {
        for raw in ["", "sin json", "{not json}", "{\"a\": 1", "} {", "[1, 2]", "42"] {
            assert!(
                matches!(extract(raw), Err(AppError::MalformedUpstreamOutput(_))),
                "expected failure for {raw:?}"
            );
        }
    }

    #[test]
    fn test_empty_object_is_all_fallbacks() {
        let result = extract("{}").unwrap();
        assert_eq!(result.similarity_percentage(), "0%");
        assert_eq!(result.patterns(), FALLBACK_PATTERNS);
    }

    #[test]
    fn test_serializes_camel_case() {
        let result = extract("{}").unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("similarityPercentage").is_some());
        assert!(value.get("similarity_percentage").is_none());
    }
}
