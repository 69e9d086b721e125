//! Severity tolerance policy: judge an observation against an expected set.
//!
//! The policy encodes that over-flagging toward greater severity is often
//! acceptable for ambiguous phrases, while under-flagging a real crisis
//! signal is not, unless a category explicitly tolerates it.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::model::severity::SeverityLevel;

/// Outcome of judging one observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgement {
    /// Whether the observation is acceptable under the policy.
    pub passed: bool,
    /// Present exactly when `passed` is false.
    pub failure_reason: Option<String>,
}

impl Judgement {
    fn pass() -> Self {
        Self {
            passed: true,
            failure_reason: None,
        }
    }

    fn fail(reason: String) -> Self {
        Self {
            passed: false,
            failure_reason: Some(reason),
        }
    }
}

/// Judge `observed` against `expected` under the tolerance flags.
///
/// Decision procedure over the severity total order:
/// 1. `observed ∈ expected` passes as an exact match.
/// 2. `observed` above the strongest expectation passes iff escalation is
///    allowed; below the weakest passes iff de-escalation is allowed.
/// 3. Anything else fails, with a reason naming the expected set, the
///    observation, and which tolerances were permitted.
///
/// An empty expected set cannot be satisfied and always fails.
#[must_use]
pub fn validate_severity(
    observed: SeverityLevel,
    expected: &BTreeSet<SeverityLevel>,
    allow_escalation: bool,
    allow_deescalation: bool,
) -> Judgement {
    if expected.contains(&observed) {
        return Judgement::pass();
    }

    let (Some(&weakest), Some(&strongest)) = (expected.first(), expected.last()) else {
        return Judgement::fail(format!(
            "expected severity set is empty; observed {observed}"
        ));
    };

    if observed > strongest && allow_escalation {
        return Judgement::pass();
    }
    if observed < weakest && allow_deescalation {
        return Judgement::pass();
    }

    Judgement::fail(failure_reason(
        observed,
        expected,
        allow_escalation,
        allow_deescalation,
    ))
}

fn failure_reason(
    observed: SeverityLevel,
    expected: &BTreeSet<SeverityLevel>,
    allow_escalation: bool,
    allow_deescalation: bool,
) -> String {
    let mut set = String::new();
    for (i, level) in expected.iter().enumerate() {
        if i > 0 {
            set.push_str(", ");
        }
        let _ = write!(set, "{level}");
    }
    let esc = if allow_escalation {
        "permitted"
    } else {
        "not permitted"
    };
    let deesc = if allow_deescalation {
        "permitted"
    } else {
        "not permitted"
    };
    format!(
        "observed {observed}, expected one of [{set}] \
         (escalation {esc}, de-escalation {deesc})"
    )
}
