//! Streaming aggregation of a run record into an immutable analysis.
//!
//! The analysis is a pure function of the run record and the analyzer
//! config: `BTreeMap` tables and nearest-rank percentiles keep repeated
//! calls bit-identical. Cases that errored before classification occurred
//! (transport failures) are excluded from the accuracy denominator and
//! surfaced separately as an error rate — never folded in silently.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::case::RunRecord;
use crate::model::severity::SeverityLevel;

/// Accuracy target for one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryTarget {
    /// Minimum acceptable pass rate, in `[0, 1]`.
    pub target_rate: f64,
    /// Whether missing the target fails the whole analysis.
    pub critical: bool,
}

impl Default for CategoryTarget {
    fn default() -> Self {
        Self {
            target_rate: 0.9,
            critical: false,
        }
    }
}

/// Analyzer tuning: targets and crisis ground-truth policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Target rate applied to categories without an explicit entry.
    pub default_target_rate: f64,
    /// Per-category targets and critical flags.
    pub category_targets: BTreeMap<String, CategoryTarget>,
    /// Categories whose cases are ground-truth crisis signals.
    pub crisis_categories: BTreeSet<String>,
    /// Observations at or above this level count as crisis-level.
    pub crisis_floor: SeverityLevel,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            default_target_rate: 0.9,
            category_targets: BTreeMap::new(),
            crisis_categories: BTreeSet::new(),
            crisis_floor: SeverityLevel::High,
        }
    }
}

impl AnalyzerConfig {
    fn target_for(&self, category: &str) -> CategoryTarget {
        self.category_targets
            .get(category)
            .copied()
            .unwrap_or(CategoryTarget {
                target_rate: self.default_target_rate,
                critical: false,
            })
    }
}

/// Accuracy of one category against its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAccuracy {
    pub passed: usize,
    pub total: usize,
    pub rate: f64,
    pub target_rate: f64,
    pub critical: bool,
    pub met_target: bool,
}

/// Accuracy of one subcategory (no targets at this granularity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryAccuracy {
    pub passed: usize,
    pub total: usize,
    pub rate: f64,
}

/// Latency statistics over cases that produced a timing value.
///
/// Percentiles use the nearest-rank method (rank = ceil(p/100 · n),
/// 1-based); the median is p50 under the same rule, so a single sample is
/// simultaneously min, max, median, p95, and p99.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub min_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
    pub median_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Derived, immutable view over one run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// All recorded cases, including transport errors.
    pub total_cases: usize,
    /// Cases that reached classification (accuracy denominator).
    pub testable_cases: usize,
    pub passed_cases: usize,
    /// `passed / testable`, 0 when nothing was testable.
    pub overall_accuracy: f64,
    /// Cases that errored before classification occurred.
    pub transport_errors: usize,
    /// `transport_errors / total`, 0 on an empty run.
    pub transport_error_rate: f64,
    pub categories: BTreeMap<String, CategoryAccuracy>,
    pub subcategories: BTreeMap<String, SubcategoryAccuracy>,
    /// Non-crisis cases observed at crisis level, over non-crisis cases.
    /// `None` when no non-crisis case produced an observation.
    pub false_positive_rate: Option<f64>,
    /// Crisis cases observed below crisis level, over crisis cases.
    /// `None` when no crisis case produced an observation.
    pub false_negative_rate: Option<f64>,
    /// `None` when no case produced a timing value.
    pub latency: Option<LatencyStats>,
    /// Critical categories that missed their target, sorted.
    pub failed_critical_categories: Vec<String>,
    /// False iff a critical category missed its target.
    pub passed: bool,
}

/// Computes an [`Analysis`] from a run record.
pub struct ResultAnalyzer {
    config: AnalyzerConfig,
}

impl ResultAnalyzer {
    #[must_use]
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze a run record. Pure: identical inputs yield identical output.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn analyze(&self, run: &RunRecord) -> Analysis {
        let total_cases = run.cases.len();
        let transport_errors = run.cases.iter().filter(|c| !c.is_testable()).count();
        let testable_cases = total_cases - transport_errors;
        let passed_cases = run.cases.iter().filter(|c| c.passed).count();

        let overall_accuracy = rate(passed_cases, testable_cases);
        let transport_error_rate = rate(transport_errors, total_cases);

        // Category and subcategory tables over testable cases, matching the
        // overall-accuracy denominator.
        let mut category_counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        let mut subcategory_counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for case in run.cases.iter().filter(|c| c.is_testable()) {
            let entry = category_counts.entry(&case.case.category).or_default();
            entry.1 += 1;
            let sub = subcategory_counts
                .entry(format!("{}/{}", case.case.category, case.case.subcategory))
                .or_default();
            sub.1 += 1;
            if case.passed {
                entry.0 += 1;
                sub.0 += 1;
            }
        }

        let mut categories = BTreeMap::new();
        let mut failed_critical_categories = Vec::new();
        for (name, (passed, total)) in category_counts {
            let target = self.config.target_for(name);
            let category_rate = rate(passed, total);
            let met_target = category_rate + 1e-9 >= target.target_rate;
            if target.critical && !met_target {
                failed_critical_categories.push(name.to_string());
            }
            categories.insert(
                name.to_string(),
                CategoryAccuracy {
                    passed,
                    total,
                    rate: category_rate,
                    target_rate: target.target_rate,
                    critical: target.critical,
                    met_target,
                },
            );
        }

        let subcategories = subcategory_counts
            .into_iter()
            .map(|(name, (passed, total))| {
                (
                    name,
                    SubcategoryAccuracy {
                        passed,
                        total,
                        rate: rate(passed, total),
                    },
                )
            })
            .collect();

        let (false_positive_rate, false_negative_rate) = self.crisis_confusion(run);

        let mut latencies: Vec<u64> = run.cases.iter().filter_map(|c| c.latency_ms).collect();
        latencies.sort_unstable();
        let latency = latency_stats(&latencies);

        let passed = failed_critical_categories.is_empty();
        Analysis {
            total_cases,
            testable_cases,
            passed_cases,
            overall_accuracy,
            transport_errors,
            transport_error_rate,
            categories,
            subcategories,
            false_positive_rate,
            false_negative_rate,
            latency,
            failed_critical_categories,
            passed,
        }
    }

    /// False-positive and false-negative rates from the case categories.
    ///
    /// Ground truth comes from the case's category (member of
    /// `crisis_categories` or not); the observation counts as crisis-level
    /// when it reaches `crisis_floor`. Only cases with an observed severity
    /// participate.
    fn crisis_confusion(&self, run: &RunRecord) -> (Option<f64>, Option<f64>) {
        let mut crisis_total = 0_usize;
        let mut crisis_missed = 0_usize;
        let mut benign_total = 0_usize;
        let mut benign_flagged = 0_usize;

        for case in &run.cases {
            let Some(observed) = case.observed_severity else {
                continue;
            };
            let truth_crisis = self.config.crisis_categories.contains(&case.case.category);
            let observed_crisis = observed >= self.config.crisis_floor;
            if truth_crisis {
                crisis_total += 1;
                if !observed_crisis {
                    crisis_missed += 1;
                }
            } else {
                benign_total += 1;
                if observed_crisis {
                    benign_flagged += 1;
                }
            }
        }

        let fp = (benign_total > 0).then(|| rate(benign_flagged, benign_total));
        let fn_ = (crisis_total > 0).then(|| rate(crisis_missed, crisis_total));
        (fp, fn_)
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Nearest-rank percentile over an ascending-sorted, non-empty slice:
/// rank = ceil(p/100 · n), clamped to `[1, n]`, 1-based.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    let n = sorted.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

#[allow(clippy::cast_precision_loss)]
fn latency_stats(sorted: &[u64]) -> Option<LatencyStats> {
    if sorted.is_empty() {
        return None;
    }
    let sum: u64 = sorted.iter().sum();
    Some(LatencyStats {
        samples: sorted.len(),
        min_ms: sorted[0],
        max_ms: sorted[sorted.len() - 1],
        mean_ms: sum as f64 / sorted.len() as f64,
        median_ms: nearest_rank(sorted, 50.0),
        p95_ms: nearest_rank(sorted, 95.0),
        p99_ms: nearest_rank(sorted, 99.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::case::{CaseResult, FailureKind, RunRecord, RunState, TestCase};
    use chrono::Utc;
    use proptest::prelude::*;

    fn test_case(category: &str, subcategory: &str) -> TestCase {
        TestCase {
            message: format!("msg-{category}-{subcategory}"),
            expected_severities: BTreeSet::from([SeverityLevel::High]),
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            allow_escalation: false,
            allow_deescalation: false,
        }
    }

    fn result(
        category: &str,
        passed: bool,
        kind: Option<FailureKind>,
        observed: Option<SeverityLevel>,
        latency_ms: Option<u64>,
    ) -> CaseResult {
        CaseResult {
            case: test_case(category, "sub"),
            observed_severity: observed,
            observed_confidence: observed.map(|_| 0.8),
            latency_ms,
            passed,
            failure_kind: kind,
            failure_reason: None,
            validation_errors: Vec::new(),
        }
    }

    fn run_with(cases: Vec<CaseResult>) -> RunRecord {
        let categories: BTreeSet<String> =
            cases.iter().map(|c| c.case.category.clone()).collect();
        RunRecord {
            run_id: "run-test".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            state: RunState::Completed,
            abort_reason: None,
            categories: categories.into_iter().collect(),
            total_cases: cases.len(),
            cases,
        }
    }

    #[test]
    fn transport_errors_excluded_from_accuracy_but_exposed() {
        let run = run_with(vec![
            result("a", true, None, Some(SeverityLevel::High), Some(10)),
            result("a", false, Some(FailureKind::Mismatch), Some(SeverityLevel::Low), Some(20)),
            result("a", false, Some(FailureKind::Transport), None, None),
            result("a", false, Some(FailureKind::Transport), None, None),
        ]);
        let analysis = ResultAnalyzer::new(AnalyzerConfig::default()).analyze(&run);

        assert_eq!(analysis.total_cases, 4);
        assert_eq!(analysis.testable_cases, 2);
        assert_eq!(analysis.passed_cases, 1);
        assert!((analysis.overall_accuracy - 0.5).abs() < 1e-12);
        assert_eq!(analysis.transport_errors, 2);
        assert!((analysis.transport_error_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn critical_category_missing_target_fails_analysis() {
        let mut config = AnalyzerConfig::default();
        config.category_targets.insert(
            "definite_high".to_string(),
            CategoryTarget {
                target_rate: 0.95,
                critical: true,
            },
        );
        let run = run_with(vec![
            result("definite_high", true, None, Some(SeverityLevel::High), Some(5)),
            result(
                "definite_high",
                false,
                Some(FailureKind::Mismatch),
                Some(SeverityLevel::Low),
                Some(5),
            ),
        ]);
        let analysis = ResultAnalyzer::new(config).analyze(&run);

        assert!(!analysis.passed);
        assert_eq!(
            analysis.failed_critical_categories,
            vec!["definite_high".to_string()]
        );
        let cat = &analysis.categories["definite_high"];
        assert!(cat.critical);
        assert!(!cat.met_target);
        assert!((cat.rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn non_critical_miss_keeps_analysis_passing() {
        let run = run_with(vec![
            result("ambiguous", false, Some(FailureKind::Mismatch), Some(SeverityLevel::Low), Some(5)),
        ]);
        let analysis = ResultAnalyzer::new(AnalyzerConfig::default()).analyze(&run);
        assert!(analysis.passed);
        assert!(!analysis.categories["ambiguous"].met_target);
    }

    #[test]
    fn subcategories_are_keyed_by_category_and_subcategory() {
        let mut a = result("cat", true, None, Some(SeverityLevel::High), Some(5));
        a.case.subcategory = "direct".to_string();
        let mut b = result("cat", false, Some(FailureKind::Mismatch), Some(SeverityLevel::Low), Some(5));
        b.case.subcategory = "indirect".to_string();
        let analysis = ResultAnalyzer::new(AnalyzerConfig::default()).analyze(&run_with(vec![a, b]));

        assert_eq!(analysis.subcategories["cat/direct"].passed, 1);
        assert_eq!(analysis.subcategories["cat/indirect"].passed, 0);
    }

    #[test]
    fn false_positive_and_negative_rates_from_categories() {
        let mut config = AnalyzerConfig::default();
        config.crisis_categories.insert("crisis".to_string());

        let run = run_with(vec![
            // Crisis case observed below the floor: false negative.
            result("crisis", false, Some(FailureKind::Mismatch), Some(SeverityLevel::Low), Some(5)),
            // Crisis case observed at the floor.
            result("crisis", true, None, Some(SeverityLevel::High), Some(5)),
            // Benign case observed at crisis level: false positive.
            result("benign", false, Some(FailureKind::Mismatch), Some(SeverityLevel::Critical), Some(5)),
            // Benign case observed below the floor.
            result("benign", true, None, Some(SeverityLevel::Low), Some(5)),
            // No observation: excluded from both denominators.
            result("benign", false, Some(FailureKind::Transport), None, None),
        ]);
        let analysis = ResultAnalyzer::new(config).analyze(&run);

        assert!((analysis.false_positive_rate.unwrap() - 0.5).abs() < 1e-12);
        assert!((analysis.false_negative_rate.unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn confusion_rates_are_none_without_observations() {
        let run = run_with(vec![result("a", false, Some(FailureKind::Transport), None, None)]);
        let analysis = ResultAnalyzer::new(AnalyzerConfig::default()).analyze(&run);
        assert!(analysis.false_positive_rate.is_none());
        assert!(analysis.false_negative_rate.is_none());
        assert!(analysis.latency.is_none());
    }

    #[test]
    fn single_latency_sample_is_every_percentile() {
        let run = run_with(vec![result("a", true, None, Some(SeverityLevel::High), Some(42))]);
        let analysis = ResultAnalyzer::new(AnalyzerConfig::default()).analyze(&run);
        let latency = analysis.latency.unwrap();
        assert_eq!(latency.samples, 1);
        assert_eq!(latency.min_ms, 42);
        assert_eq!(latency.max_ms, 42);
        assert_eq!(latency.median_ms, 42);
        assert_eq!(latency.p95_ms, 42);
        assert_eq!(latency.p99_ms, 42);
        assert!((latency.mean_ms - 42.0).abs() < 1e-12);
    }

    #[test]
    fn nearest_rank_on_known_list() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(nearest_rank(&sorted, 50.0), 50);
        assert_eq!(nearest_rank(&sorted, 95.0), 95);
        assert_eq!(nearest_rank(&sorted, 99.0), 99);
        // Ten values: p95 → rank ceil(9.5) = 10.
        let ten: Vec<u64> = (1..=10).collect();
        assert_eq!(nearest_rank(&ten, 95.0), 10);
        assert_eq!(nearest_rank(&ten, 50.0), 5);
    }

    #[test]
    fn analysis_is_idempotent() {
        let run = run_with(vec![
            result("a", true, None, Some(SeverityLevel::High), Some(10)),
            result("b", false, Some(FailureKind::Mismatch), Some(SeverityLevel::Low), Some(30)),
            result("a", false, Some(FailureKind::Transport), None, None),
        ]);
        let analyzer = ResultAnalyzer::new(AnalyzerConfig::default());
        let first = analyzer.analyze(&run);
        let second = analyzer.analyze(&run);
        assert_eq!(first, second);
        // Bit-identical through serialization as well.
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    proptest! {
        #[test]
        fn percentiles_are_ordered_members_of_input(
            mut values in prop::collection::vec(0_u64..100_000, 1..200)
        ) {
            values.sort_unstable();
            let stats = latency_stats(&values).unwrap();
            prop_assert!(values.contains(&stats.median_ms));
            prop_assert!(values.contains(&stats.p95_ms));
            prop_assert!(values.contains(&stats.p99_ms));
            prop_assert!(stats.min_ms <= stats.median_ms);
            prop_assert!(stats.median_ms <= stats.p95_ms);
            prop_assert!(stats.p95_ms <= stats.p99_ms);
            prop_assert!(stats.p99_ms <= stats.max_ms);
        }

        #[test]
        fn mean_stays_within_min_max(
            mut values in prop::collection::vec(0_u64..100_000, 1..200)
        ) {
            values.sort_unstable();
            let stats = latency_stats(&values).unwrap();
            prop_assert!(stats.mean_ms >= stats.min_ms as f64);
            prop_assert!(stats.mean_ms <= stats.max_ms as f64);
        }
    }
}
