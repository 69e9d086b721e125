//! Typed view of a shape-valid classifier response.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::errors::{HarnessError, Result};
use crate::model::severity::{RecommendedAction, SeverityLevel};

/// Raw classifier response body plus the measured request latency.
#[derive(Debug, Clone)]
pub struct TimedResponse {
    /// JSON body exactly as the service returned it.
    pub body: serde_json::Value,
    /// Wall-clock latency of the successful attempt.
    pub latency_ms: u64,
}

/// Fully parsed classifier response.
///
/// Only constructed from bodies that already passed shape validation; the
/// field set mirrors the remote service contract exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResponse {
    pub severity: SeverityLevel,
    pub confidence: f64,
    pub crisis_detected: bool,
    pub crisis_score: f64,
    pub recommended_action: RecommendedAction,
    /// Per-signal detail mapping, kept opaque.
    pub signals: BTreeMap<String, serde_json::Value>,
    pub processing_time_ms: f64,
    pub models_used: Vec<String>,
    pub degraded: bool,
    pub request_id: String,
    pub timestamp: String,
}

impl ClassifierResponse {
    /// Parse a shape-valid body into the typed form.
    ///
    /// A parse failure here means the shape validator and this struct have
    /// drifted apart; it is reported as a contract violation, not a panic.
    pub fn from_value(body: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(body.clone()).map_err(|error| HarnessError::ShapeViolation {
            details: format!("failed to decode shape-valid response: {error}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn full_body() -> serde_json::Value {
        json!({
            "severity": "high",
            "confidence": 0.92,
            "crisis_detected": true,
            "crisis_score": 0.88,
            "recommended_action": "escalate",
            "signals": { "self_harm": 0.91, "hopelessness": 0.4 },
            "processing_time_ms": 41.5,
            "models_used": ["crisis-bert-v2"],
            "degraded": false,
            "request_id": "req-123",
            "timestamp": "2026-08-27T12:00:00Z"
        })
    }

    #[test]
    fn parses_full_response() {
        let resp = ClassifierResponse::from_value(&full_body()).unwrap();
        assert_eq!(resp.severity, SeverityLevel::High);
        assert_eq!(resp.recommended_action, RecommendedAction::Escalate);
        assert!(resp.crisis_detected);
        assert_eq!(resp.models_used, vec!["crisis-bert-v2".to_string()]);
    }

    #[test]
    fn unknown_severity_is_a_contract_violation() {
        let mut body = full_body();
        body["severity"] = json!("urgent");
        let err = ClassifierResponse::from_value(&body).unwrap_err();
        assert_eq!(err.code(), "CRH-2003");
    }

    #[test]
    fn missing_field_is_a_contract_violation() {
        let mut body = full_body();
        body.as_object_mut().unwrap().remove("request_id");
        let err = ClassifierResponse::from_value(&body).unwrap_err();
        assert_eq!(err.code(), "CRH-2003");
    }
}
