//! Test cases, per-case results, and the run record that owns them.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::severity::SeverityLevel;

/// One labeled test input with its expected outcome and tolerance policy.
///
/// Supplied by the corpus collaborator and never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Message text sent to the classifier verbatim.
    pub message: String,
    /// Severities accepted as an exact match.
    pub expected_severities: BTreeSet<SeverityLevel>,
    /// Top-level grouping used for accuracy targets and ground truth.
    pub category: String,
    /// Finer-grained grouping within the category.
    pub subcategory: String,
    /// Whether an observation above the strongest expectation passes.
    pub allow_escalation: bool,
    /// Whether an observation below the weakest expectation passes.
    pub allow_deescalation: bool,
}

impl TestCase {
    /// Stable identity used to match cases across two runs.
    #[must_use]
    pub fn identity(&self) -> CaseIdentity {
        CaseIdentity {
            message: self.message.clone(),
            category: self.category.clone(),
        }
    }
}

/// Stable case identity: message text plus category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseIdentity {
    pub message: String,
    pub category: String,
}

/// Why a case failed, when it did.
///
/// `Transport` failures happened before any classification and are excluded
/// from the accuracy denominator; `Shape` and `Mismatch` failures are real
/// test outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network/timeout/permanent-request failure; no response to judge.
    Transport,
    /// Response arrived but violated the service contract.
    Shape,
    /// Response was well-formed but the severity missed the expectation.
    Mismatch,
}

/// Outcome of one test case within one run. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    /// The originating case, carried whole so snapshots are self-contained.
    pub case: TestCase,
    /// Severity the classifier returned, when a valid response arrived.
    pub observed_severity: Option<SeverityLevel>,
    /// Confidence the classifier reported alongside the severity.
    pub observed_confidence: Option<f64>,
    /// Wall-clock latency of the successful request, when one completed.
    pub latency_ms: Option<u64>,
    /// Whether the case passed under the tolerance policy.
    pub passed: bool,
    /// Failure classification; `None` when `passed`.
    pub failure_kind: Option<FailureKind>,
    /// Human-readable failure explanation.
    pub failure_reason: Option<String>,
    /// Shape-validation violations, when the response failed the contract.
    pub validation_errors: Vec<String>,
}

impl CaseResult {
    /// Whether the case counts toward the accuracy denominator.
    #[must_use]
    pub fn is_testable(&self) -> bool {
        !matches!(self.failure_kind, Some(FailureKind::Transport))
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Every filtered case produced a result.
    Completed,
    /// The run stopped early; `abort_reason` explains why.
    Aborted,
}

/// One full pass of the (filtered) corpus through the classifier.
///
/// Cases appear in corpus order regardless of completion order. The record
/// is append-only during the run and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Timestamp-derived identifier, unique per execution.
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    /// Present exactly when `state == Aborted`.
    pub abort_reason: Option<String>,
    /// Sorted, de-duplicated categories that were executed.
    pub categories: Vec<String>,
    /// Number of case results recorded.
    pub total_cases: usize,
    pub cases: Vec<CaseResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(message: &str, category: &str) -> TestCase {
        TestCase {
            message: message.to_string(),
            expected_severities: BTreeSet::from([SeverityLevel::High]),
            category: category.to_string(),
            subcategory: "default".to_string(),
            allow_escalation: false,
            allow_deescalation: false,
        }
    }

    #[test]
    fn identity_is_message_plus_category() {
        let a = case("help me", "definite_high");
        let b = case("help me", "definite_high");
        let c = case("help me", "ambiguous");
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn transport_failures_are_not_testable() {
        let result = CaseResult {
            case: case("m", "c"),
            observed_severity: None,
            observed_confidence: None,
            latency_ms: None,
            passed: false,
            failure_kind: Some(FailureKind::Transport),
            failure_reason: Some("connect refused".to_string()),
            validation_errors: Vec::new(),
        };
        assert!(!result.is_testable());
    }

    #[test]
    fn shape_and_mismatch_failures_are_testable() {
        for kind in [FailureKind::Shape, FailureKind::Mismatch] {
            let result = CaseResult {
                case: case("m", "c"),
                observed_severity: None,
                observed_confidence: None,
                latency_ms: Some(12),
                passed: false,
                failure_kind: Some(kind),
                failure_reason: None,
                validation_errors: Vec::new(),
            };
            assert!(result.is_testable(), "{kind:?} should be testable");
        }
    }

    #[test]
    fn run_record_serde_round_trip_preserves_case_order() {
        let record = RunRecord {
            run_id: "run-20260101T000000.000Z".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            state: RunState::Completed,
            abort_reason: None,
            categories: vec!["a".to_string(), "b".to_string()],
            total_cases: 2,
            cases: vec![
                CaseResult {
                    case: case("first", "a"),
                    observed_severity: Some(SeverityLevel::High),
                    observed_confidence: Some(0.9),
                    latency_ms: Some(10),
                    passed: true,
                    failure_kind: None,
                    failure_reason: None,
                    validation_errors: Vec::new(),
                },
                CaseResult {
                    case: case("second", "b"),
                    observed_severity: Some(SeverityLevel::Low),
                    observed_confidence: Some(0.4),
                    latency_ms: Some(20),
                    passed: false,
                    failure_kind: Some(FailureKind::Mismatch),
                    failure_reason: Some("mismatch".to_string()),
                    validation_errors: Vec::new(),
                },
            ],
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.cases[0].case.message, "first");
        assert_eq!(back.cases[1].case.message, "second");
    }
}
