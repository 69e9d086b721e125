//! Baseline-versus-candidate comparison of two snapshots.
//!
//! Thresholds are absolute percentage points of accuracy. A strict
//! floating-point comparison would flip verdicts on representation noise,
//! so every decrease check uses a small epsilon; deltas smaller than that
//! count as held.
//!
//! The verdict is ordered: any overall-accuracy decrease or a critical
//! category regressing beyond its threshold is FAIL; otherwise any
//! non-critical regression beyond threshold is WARN; otherwise PASS.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::analysis::analyzer::LatencyStats;
use crate::model::case::CaseIdentity;
use crate::snapshot::store::Snapshot;

/// Deltas smaller than this are treated as no change.
const EPS: f64 = 1e-9;

/// Comparison tuning: regression thresholds in accuracy percentage points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Threshold applied to categories without an explicit entry.
    pub default_regression_threshold_pct: f64,
    /// Per-category threshold overrides.
    pub category_thresholds: BTreeMap<String, f64>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            default_regression_threshold_pct: 5.0,
            category_thresholds: BTreeMap::new(),
        }
    }
}

impl CompareConfig {
    fn threshold_for(&self, category: &str) -> f64 {
        self.category_thresholds
            .get(category)
            .copied()
            .unwrap_or(self.default_regression_threshold_pct)
    }
}

/// How one category moved between the two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryVerdict {
    /// Accuracy rose.
    Improved,
    /// Accuracy unchanged within epsilon.
    Held,
    /// Accuracy fell, but within the threshold.
    Declined,
    /// Accuracy fell beyond the threshold.
    Regressed,
    /// Category present only in the candidate.
    MissingBaseline,
    /// Category present only in the baseline.
    MissingCandidate,
}

/// Per-category accuracy movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDelta {
    pub baseline_rate: Option<f64>,
    pub candidate_rate: Option<f64>,
    /// `(candidate - baseline) * 100`; zero when either side is missing.
    pub delta_pct_points: f64,
    pub threshold_pct: f64,
    /// Critical flag taken from the candidate analysis (baseline as
    /// fallback when the category vanished).
    pub critical: bool,
    pub verdict: CategoryVerdict,
}

/// Direction of a per-phrase outcome flip between the two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    PassToFail,
    FailToPass,
}

/// One phrase whose outcome flipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseChange {
    pub identity: CaseIdentity,
    pub transition: Transition,
}

/// Latency movement between the two snapshots, when both have samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyDelta {
    pub baseline: LatencyStats,
    pub candidate: LatencyStats,
    pub median_delta_ms: i64,
    pub p95_delta_ms: i64,
    pub p99_delta_ms: i64,
}

/// Final release verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pass => "PASS",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

/// Full comparison report over two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub baseline_id: String,
    pub candidate_id: String,
    pub baseline_accuracy: f64,
    pub candidate_accuracy: f64,
    /// `(candidate - baseline) * 100` overall.
    pub overall_delta_pct_points: f64,
    pub categories: BTreeMap<String, CategoryDelta>,
    /// Phrases whose outcome flipped, in identity order.
    pub phrase_changes: Vec<PhraseChange>,
    /// Phrases present in both snapshots with the same outcome.
    pub unchanged_phrases: usize,
    /// Phrases present only in the baseline.
    pub baseline_only_phrases: usize,
    /// Phrases present only in the candidate.
    pub candidate_only_phrases: usize,
    /// `None` when either snapshot recorded no latency samples.
    pub latency: Option<LatencyDelta>,
    pub overall_verdict: Verdict,
}

/// Compare two snapshots under the given thresholds.
#[must_use]
pub fn compare_snapshots(
    baseline: &Snapshot,
    candidate: &Snapshot,
    config: &CompareConfig,
) -> ComparisonResult {
    let baseline_accuracy = baseline.analysis.overall_accuracy;
    let candidate_accuracy = candidate.analysis.overall_accuracy;
    let overall_delta_pct_points = (candidate_accuracy - baseline_accuracy) * 100.0;

    let categories = category_deltas(baseline, candidate, config);
    let (phrase_changes, unchanged_phrases, baseline_only_phrases, candidate_only_phrases) =
        phrase_diff(baseline, candidate);
    let latency = latency_delta(baseline, candidate);

    let overall_decreased = overall_delta_pct_points < -EPS;
    let critical_regressed = categories
        .values()
        .any(|d| d.critical && d.verdict == CategoryVerdict::Regressed);
    let any_regressed = categories
        .values()
        .any(|d| d.verdict == CategoryVerdict::Regressed);

    let overall_verdict = if overall_decreased || critical_regressed {
        Verdict::Fail
    } else if any_regressed {
        Verdict::Warn
    } else {
        Verdict::Pass
    };

    ComparisonResult {
        baseline_id: baseline.meta.id.clone(),
        candidate_id: candidate.meta.id.clone(),
        baseline_accuracy,
        candidate_accuracy,
        overall_delta_pct_points,
        categories,
        phrase_changes,
        unchanged_phrases,
        baseline_only_phrases,
        candidate_only_phrases,
        latency,
        overall_verdict,
    }
}

fn category_deltas(
    baseline: &Snapshot,
    candidate: &Snapshot,
    config: &CompareConfig,
) -> BTreeMap<String, CategoryDelta> {
    let names: BTreeSet<&String> = baseline
        .analysis
        .categories
        .keys()
        .chain(candidate.analysis.categories.keys())
        .collect();

    let mut deltas = BTreeMap::new();
    for name in names {
        let before = baseline.analysis.categories.get(name);
        let after = candidate.analysis.categories.get(name);
        let threshold_pct = config.threshold_for(name);
        let critical = after.or(before).is_some_and(|c| c.critical);

        let (delta_pct_points, verdict) = match (before, after) {
            (Some(before), Some(after)) => {
                let delta = (after.rate - before.rate) * 100.0;
                let verdict = if delta > EPS {
                    CategoryVerdict::Improved
                } else if delta >= -EPS {
                    CategoryVerdict::Held
                } else if delta >= -(threshold_pct + EPS) {
                    CategoryVerdict::Declined
                } else {
                    CategoryVerdict::Regressed
                };
                (delta, verdict)
            }
            (None, Some(_)) => (0.0, CategoryVerdict::MissingBaseline),
            (Some(_), None) => (0.0, CategoryVerdict::MissingCandidate),
            (None, None) => unreachable!("name came from one of the two maps"),
        };

        deltas.insert(
            name.clone(),
            CategoryDelta {
                baseline_rate: before.map(|c| c.rate),
                candidate_rate: after.map(|c| c.rate),
                delta_pct_points,
                threshold_pct,
                critical,
                verdict,
            },
        );
    }
    deltas
}

/// Phrase-level diff keyed by case identity. A phrase only participates in
/// the flip lists when it appears in both snapshots.
fn phrase_diff(
    baseline: &Snapshot,
    candidate: &Snapshot,
) -> (Vec<PhraseChange>, usize, usize, usize) {
    let before: BTreeMap<CaseIdentity, bool> = baseline
        .run
        .cases
        .iter()
        .map(|r| (r.case.identity(), r.passed))
        .collect();
    let after: BTreeMap<CaseIdentity, bool> = candidate
        .run
        .cases
        .iter()
        .map(|r| (r.case.identity(), r.passed))
        .collect();

    let mut changes = Vec::new();
    let mut unchanged = 0_usize;
    let mut baseline_only = 0_usize;
    for (identity, was_passing) in &before {
        match after.get(identity) {
            None => baseline_only += 1,
            Some(now_passing) if now_passing == was_passing => unchanged += 1,
            Some(&now_passing) => changes.push(PhraseChange {
                identity: identity.clone(),
                transition: if now_passing {
                    Transition::FailToPass
                } else {
                    Transition::PassToFail
                },
            }),
        }
    }
    let candidate_only = after.keys().filter(|id| !before.contains_key(*id)).count();
    (changes, unchanged, baseline_only, candidate_only)
}

#[allow(clippy::cast_possible_wrap)]
fn latency_delta(baseline: &Snapshot, candidate: &Snapshot) -> Option<LatencyDelta> {
    let before = baseline.analysis.latency.clone()?;
    let after = candidate.analysis.latency.clone()?;
    Some(LatencyDelta {
        median_delta_ms: after.median_ms as i64 - before.median_ms as i64,
        p95_delta_ms: after.p95_ms as i64 - before.p95_ms as i64,
        p99_delta_ms: after.p99_ms as i64 - before.p99_ms as i64,
        baseline: before,
        candidate: after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::{Analysis, CategoryAccuracy};
    use crate::model::case::{CaseResult, FailureKind, RunRecord, RunState, TestCase};
    use crate::model::severity::SeverityLevel;
    use crate::snapshot::store::{CaptureMeta, SnapshotMeta, SNAPSHOT_FORMAT_VERSION};
    use chrono::Utc;

    fn category(rate: f64, critical: bool) -> CategoryAccuracy {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let passed = (rate * 100.0).round() as usize;
        CategoryAccuracy {
            passed,
            total: 100,
            rate,
            target_rate: 0.9,
            critical,
            met_target: rate >= 0.9,
        }
    }

    fn case_result(message: &str, category: &str, passed: bool) -> CaseResult {
        CaseResult {
            case: TestCase {
                message: message.to_string(),
                expected_severities: std::collections::BTreeSet::from([SeverityLevel::High]),
                category: category.to_string(),
                subcategory: "sub".to_string(),
                allow_escalation: false,
                allow_deescalation: false,
            },
            observed_severity: Some(if passed {
                SeverityLevel::High
            } else {
                SeverityLevel::Low
            }),
            observed_confidence: Some(0.8),
            latency_ms: Some(25),
            passed,
            failure_kind: (!passed).then_some(FailureKind::Mismatch),
            failure_reason: None,
            validation_errors: Vec::new(),
        }
    }

    fn snapshot(
        id: &str,
        overall: f64,
        categories: &[(&str, f64, bool)],
        cases: Vec<CaseResult>,
    ) -> Snapshot {
        let analysis = Analysis {
            total_cases: cases.len(),
            testable_cases: cases.len(),
            passed_cases: cases.iter().filter(|c| c.passed).count(),
            overall_accuracy: overall,
            transport_errors: 0,
            transport_error_rate: 0.0,
            categories: categories
                .iter()
                .map(|(name, rate, critical)| ((*name).to_string(), category(*rate, *critical)))
                .collect(),
            subcategories: BTreeMap::new(),
            false_positive_rate: None,
            false_negative_rate: None,
            latency: None,
            failed_critical_categories: Vec::new(),
            passed: true,
        };
        Snapshot {
            meta: SnapshotMeta {
                id: id.to_string(),
                label: id.split('-').next().unwrap_or(id).to_string(),
                captured_at: Utc::now(),
                format_version: SNAPSHOT_FORMAT_VERSION,
                capture: CaptureMeta::default(),
            },
            run: RunRecord {
                run_id: format!("run-for-{id}"),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                state: RunState::Completed,
                abort_reason: None,
                categories: categories.iter().map(|(n, _, _)| (*n).to_string()).collect(),
                total_cases: cases.len(),
                cases,
            },
            analysis,
        }
    }

    #[test]
    fn improvement_everywhere_is_pass() {
        let baseline = snapshot("base-1", 0.90, &[("definite_high", 0.90, false)], vec![]);
        let candidate = snapshot("cand-1", 0.92, &[("definite_high", 0.92, false)], vec![]);
        let result = compare_snapshots(&baseline, &candidate, &CompareConfig::default());

        assert_eq!(result.overall_verdict, Verdict::Pass);
        assert!((result.overall_delta_pct_points - 2.0).abs() < 1e-9);
        assert_eq!(
            result.categories["definite_high"].verdict,
            CategoryVerdict::Improved
        );
    }

    #[test]
    fn overall_decrease_is_fail_even_within_thresholds() {
        let baseline = snapshot("base-1", 0.90, &[("definite_high", 0.90, false)], vec![]);
        let candidate = snapshot("cand-1", 0.88, &[("definite_high", 0.88, false)], vec![]);
        let result = compare_snapshots(&baseline, &candidate, &CompareConfig::default());

        // The category decline (2 points) is within the 5-point threshold,
        // but the overall decrease alone forces FAIL.
        assert_eq!(
            result.categories["definite_high"].verdict,
            CategoryVerdict::Declined
        );
        assert_eq!(result.overall_verdict, Verdict::Fail);
    }

    #[test]
    fn non_critical_regression_with_overall_gain_is_warn() {
        let mut config = CompareConfig::default();
        config
            .category_thresholds
            .insert("definite_low".to_string(), 15.0);
        let baseline = snapshot(
            "base-1",
            0.90,
            &[("definite_high", 0.95, false), ("definite_low", 0.80, false)],
            vec![],
        );
        let candidate = snapshot(
            "cand-1",
            0.93,
            &[("definite_high", 0.98, false), ("definite_low", 0.60, false)],
            vec![],
        );
        let result = compare_snapshots(&baseline, &candidate, &config);

        // definite_low dropped 20 points against a 15-point threshold.
        assert_eq!(
            result.categories["definite_low"].verdict,
            CategoryVerdict::Regressed
        );
        assert_eq!(result.overall_verdict, Verdict::Warn);
    }

    #[test]
    fn critical_regression_is_fail_despite_overall_gain() {
        let baseline = snapshot("base-1", 0.90, &[("definite_high", 0.98, true)], vec![]);
        let candidate = snapshot("cand-1", 0.95, &[("definite_high", 0.85, true)], vec![]);
        let result = compare_snapshots(&baseline, &candidate, &CompareConfig::default());

        // 13-point drop against the default 5-point threshold on a critical
        // category: FAIL wins over the overall improvement.
        assert_eq!(
            result.categories["definite_high"].verdict,
            CategoryVerdict::Regressed
        );
        assert!(result.categories["definite_high"].critical);
        assert_eq!(result.overall_verdict, Verdict::Fail);
    }

    #[test]
    fn decline_exactly_at_threshold_is_not_a_regression() {
        let baseline = snapshot("base-1", 0.90, &[("cat", 0.90, false)], vec![]);
        let candidate = snapshot("cand-1", 0.90, &[("cat", 0.85, false)], vec![]);
        let result = compare_snapshots(&baseline, &candidate, &CompareConfig::default());

        assert_eq!(result.categories["cat"].verdict, CategoryVerdict::Declined);
        assert_eq!(result.overall_verdict, Verdict::Pass);
    }

    #[test]
    fn identical_rates_hold_under_epsilon() {
        let baseline = snapshot("base-1", 0.9, &[("cat", 0.9, false)], vec![]);
        let candidate = snapshot("cand-1", 0.9 + 1e-12, &[("cat", 0.9 - 1e-12, false)], vec![]);
        let result = compare_snapshots(&baseline, &candidate, &CompareConfig::default());

        assert_eq!(result.categories["cat"].verdict, CategoryVerdict::Held);
        assert_eq!(result.overall_verdict, Verdict::Pass);
    }

    #[test]
    fn missing_categories_are_reported_not_scored() {
        let baseline = snapshot(
            "base-1",
            0.90,
            &[("kept", 0.90, false), ("removed", 0.80, false)],
            vec![],
        );
        let candidate = snapshot(
            "cand-1",
            0.91,
            &[("kept", 0.91, false), ("added", 0.70, false)],
            vec![],
        );
        let result = compare_snapshots(&baseline, &candidate, &CompareConfig::default());

        assert_eq!(
            result.categories["removed"].verdict,
            CategoryVerdict::MissingCandidate
        );
        assert_eq!(
            result.categories["added"].verdict,
            CategoryVerdict::MissingBaseline
        );
        // Missing categories never trigger WARN/FAIL on their own.
        assert_eq!(result.overall_verdict, Verdict::Pass);
    }

    #[test]
    fn phrase_flips_are_split_by_direction() {
        let baseline = snapshot(
            "base-1",
            0.5,
            &[("cat", 0.5, false)],
            vec![
                case_result("stays passing", "cat", true),
                case_result("breaks", "cat", true),
                case_result("recovers", "cat", false),
                case_result("only in baseline", "cat", false),
            ],
        );
        let candidate = snapshot(
            "cand-1",
            0.5,
            &[("cat", 0.5, false)],
            vec![
                case_result("stays passing", "cat", true),
                case_result("breaks", "cat", false),
                case_result("recovers", "cat", true),
                case_result("only in candidate", "cat", true),
            ],
        );
        let result = compare_snapshots(&baseline, &candidate, &CompareConfig::default());

        assert_eq!(result.unchanged_phrases, 1);
        assert_eq!(result.baseline_only_phrases, 1);
        assert_eq!(result.candidate_only_phrases, 1);
        assert_eq!(result.phrase_changes.len(), 2);

        let breaks = result
            .phrase_changes
            .iter()
            .find(|c| c.identity.message == "breaks")
            .expect("breaks should be listed");
        assert_eq!(breaks.transition, Transition::PassToFail);
        let recovers = result
            .phrase_changes
            .iter()
            .find(|c| c.identity.message == "recovers")
            .expect("recovers should be listed");
        assert_eq!(recovers.transition, Transition::FailToPass);
    }

    #[test]
    fn latency_delta_requires_samples_on_both_sides() {
        let baseline = snapshot("base-1", 0.9, &[], vec![]);
        let mut candidate = snapshot("cand-1", 0.9, &[], vec![]);
        candidate.analysis.latency = Some(LatencyStats {
            samples: 3,
            min_ms: 10,
            max_ms: 30,
            mean_ms: 20.0,
            median_ms: 20,
            p95_ms: 30,
            p99_ms: 30,
        });
        let result = compare_snapshots(&baseline, &candidate, &CompareConfig::default());
        assert!(result.latency.is_none());

        let mut baseline = baseline;
        baseline.analysis.latency = Some(LatencyStats {
            samples: 3,
            min_ms: 15,
            max_ms: 45,
            mean_ms: 30.0,
            median_ms: 30,
            p95_ms: 45,
            p99_ms: 45,
        });
        let result = compare_snapshots(&baseline, &candidate, &CompareConfig::default());
        let latency = result.latency.expect("both sides have samples");
        assert_eq!(latency.median_delta_ms, -10);
        assert_eq!(latency.p95_delta_ms, -15);
        assert_eq!(latency.p99_delta_ms, -15);
    }

    #[test]
    fn verdict_display_is_uppercase() {
        assert_eq!(Verdict::Pass.to_string(), "PASS");
        assert_eq!(Verdict::Warn.to_string(), "WARN");
        assert_eq!(Verdict::Fail.to_string(), "FAIL");
    }
}
