//! Response shape validation: the contract check at the service boundary.
//!
//! A response failing shape validation is a contract violation by the remote
//! service, distinct from a classification mismatch. Violations accumulate;
//! validation never stops at the first error.

use serde_json::Value;

use crate::model::severity::{RecommendedAction, SeverityLevel};

/// Accumulated shape-validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeReport {
    /// True iff `errors` is empty.
    pub is_valid: bool,
    /// Every violation found, in field order.
    pub errors: Vec<String>,
}

/// JSON type expected for a required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Str,
    Number,
    Bool,
    Object,
    Array,
}

impl FieldKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Str => "string",
            Self::Number => "number",
            Self::Bool => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Str => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Required fields of the classifier response, in validation order.
const REQUIRED_FIELDS: &[(&str, FieldKind)] = &[
    ("severity", FieldKind::Str),
    ("confidence", FieldKind::Number),
    ("crisis_detected", FieldKind::Bool),
    ("crisis_score", FieldKind::Number),
    ("recommended_action", FieldKind::Str),
    ("signals", FieldKind::Object),
    ("processing_time_ms", FieldKind::Number),
    ("models_used", FieldKind::Array),
    ("degraded", FieldKind::Bool),
    ("request_id", FieldKind::Str),
    ("timestamp", FieldKind::Str),
];

/// Validate a raw response body against the service contract.
///
/// Checks, in order: field presence, per-field type, numeric ranges
/// (`confidence` and `crisis_score` in `[0, 1]`, `processing_time_ms >= 0`),
/// and enum membership for `severity` and `recommended_action`. All
/// violations are reported together.
#[must_use]
pub fn validate_shape(body: &Value) -> ShapeReport {
    let Some(map) = body.as_object() else {
        return ShapeReport {
            is_valid: false,
            errors: vec!["response is not a JSON object".to_string()],
        };
    };

    let mut errors = Vec::new();

    for &(field, kind) in REQUIRED_FIELDS {
        match map.get(field) {
            None => errors.push(format!("missing required field `{field}`")),
            Some(value) if !kind.matches(value) => {
                errors.push(format!(
                    "field `{field}` must be a {}, got {}",
                    kind.name(),
                    json_type_name(value)
                ));
            }
            Some(_) => {}
        }
    }

    for field in ["confidence", "crisis_score"] {
        if let Some(value) = map.get(field).and_then(Value::as_f64)
            && !(0.0..=1.0).contains(&value)
        {
            errors.push(format!("field `{field}` must be in [0, 1], got {value}"));
        }
    }
    if let Some(value) = map.get("processing_time_ms").and_then(Value::as_f64)
        && value < 0.0
    {
        errors.push(format!(
            "field `processing_time_ms` must be >= 0, got {value}"
        ));
    }

    if let Some(value) = map.get("severity").and_then(Value::as_str)
        && value.parse::<SeverityLevel>().is_err()
    {
        errors.push(format!(
            "field `severity` must be one of {:?}, got {value:?}",
            SeverityLevel::LABELS
        ));
    }
    if let Some(value) = map.get("recommended_action").and_then(Value::as_str)
        && !RecommendedAction::LABELS.contains(&value)
    {
        errors.push(format!(
            "field `recommended_action` must be one of {:?}, got {value:?}",
            RecommendedAction::LABELS
        ));
    }

    ShapeReport {
        is_valid: errors.is_empty(),
        errors,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
