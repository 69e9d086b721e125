//! Ordered severity scale and the classifier's action vocabulary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Crisis-risk severity ladder, ordered from least to most severe.
///
/// Explicit discriminants fix the total order that the tolerance policy
/// compares against: no two levels compare equal except themselves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SeverityLevel {
    /// No crisis signal present.
    None = 0,
    /// Mild distress, no immediate risk.
    Low = 1,
    /// Concerning signal warranting attention.
    Medium = 2,
    /// Strong crisis signal.
    High = 3,
    /// Imminent-risk signal.
    Critical = 4,
}

impl SeverityLevel {
    /// All levels, in ascending severity order.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];

    /// Wire labels accepted from the classifier, ascending.
    pub const LABELS: [&'static str; 5] = ["none", "low", "medium", "high", "critical"];

    /// Canonical lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeverityLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown severity level {other:?} (expected one of {:?})",
                Self::LABELS
            )),
        }
    }
}

/// Action the classifier recommends alongside a severity assessment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// No follow-up needed.
    None,
    /// Keep the conversation under observation.
    Monitor,
    /// Route to a human reviewer.
    Escalate,
    /// Trigger immediate intervention.
    Emergency,
}

impl RecommendedAction {
    /// Wire labels accepted from the classifier.
    pub const LABELS: [&'static str; 4] = ["none", "monitor", "escalate", "emergency"];

    /// Canonical snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Monitor => "monitor",
            Self::Escalate => "escalate",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
