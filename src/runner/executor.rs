//! Bounded-concurrency test execution over the corpus.
//!
//! One run moves through `PENDING → RUNNING → {COMPLETED, ABORTED}`. A fixed
//! worker pool pulls cases from a bounded channel and sends results back
//! tagged with their corpus slot, so the run record's order is always corpus
//! order no matter which calls finish first. Per-case failures of any kind
//! become failed case results; only an unreachable classifier at
//! health-check time (or an operator stop signal) aborts a run, and even
//! then the partial record is returned, never discarded.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::Utc;
use crossbeam_channel as channel;
use serde::{Deserialize, Serialize};

use crate::client::http::ClassifierClient;
use crate::client::response::ClassifierResponse;
use crate::core::errors::{HarnessError, Result};
use crate::model::case::{CaseResult, FailureKind, RunRecord, RunState, TestCase};
use crate::validate::classification::validate_severity;
use crate::validate::shape::validate_shape;

/// Runner tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum simultaneous outstanding classifier calls.
    pub concurrency: usize,
    /// Probe the classifier's health endpoint before issuing any case.
    pub health_check: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            health_check: true,
        }
    }
}

/// Observer invoked once per completed case with
/// `(completed_count, total_count, case_result)`.
///
/// Invocation order follows completion, not corpus order; only the counts
/// are guaranteed monotonic.
pub type ProgressObserver = Arc<dyn Fn(usize, usize, &CaseResult) + Send + Sync>;

/// Cooperative stop signal shared with worker threads.
///
/// Stopping halts the issuing of new classifier calls; in-flight calls
/// finish (or time out) and their results are kept.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request cooperative termination of the current run.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Orchestrates corpus execution against the classification client.
pub struct TestRunner {
    config: RunnerConfig,
    client: ClassifierClient,
    stop: StopHandle,
}

impl TestRunner {
    #[must_use]
    pub fn new(config: RunnerConfig, client: ClassifierClient) -> Self {
        Self {
            config,
            client,
            stop: StopHandle::default(),
        }
    }

    /// Handle for cooperative cancellation of the current run.
    ///
    /// The flag clears when the next run starts; a handle held across runs
    /// only affects the run in progress when `stop` is called.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Execute the corpus (optionally filtered by category) and produce a
    /// run record with one case result per filtered case, in corpus order.
    pub fn run(
        &self,
        corpus: &[TestCase],
        categories: Option<&BTreeSet<String>>,
        progress: Option<ProgressObserver>,
    ) -> Result<RunRecord> {
        let started_at = Utc::now();
        let run_id = format!("run-{}", started_at.format("%Y%m%dT%H%M%S%.3fZ"));
        self.stop.reset();

        let filtered = filter_corpus(corpus, categories);
        let total = filtered.len();
        let executed_categories = collect_categories(&filtered);

        if self.config.health_check && !self.client.health() {
            return Ok(RunRecord {
                run_id,
                started_at,
                finished_at: Utc::now(),
                state: RunState::Aborted,
                abort_reason: Some(
                    "classifier failed its health check before any case was issued".to_string(),
                ),
                categories: executed_categories,
                total_cases: 0,
                cases: Vec::new(),
            });
        }

        let workers = self.config.concurrency.max(1).min(total.max(1));
        let (work_tx, work_rx) = channel::bounded::<(usize, TestCase)>(total.max(1));
        let (result_tx, result_rx) = channel::unbounded::<(usize, CaseResult)>();

        // The whole filtered corpus fits the bounded queue, so seeding
        // cannot block before workers start draining.
        for item in filtered.into_iter().enumerate() {
            work_tx.send(item).map_err(|_| HarnessError::ChannelClosed {
                component: "runner work queue",
            })?;
        }
        drop(work_tx);

        // Each case owns its own slot; corpus order is reconstructed from
        // slot indices regardless of completion order.
        let mut slots: Vec<Option<CaseResult>> = (0..total).map(|_| None).collect();
        let mut completed = 0_usize;

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let stop = self.stop.clone();
                let client = &self.client;
                scope.spawn(move || {
                    while let Ok((slot, case)) = work_rx.recv() {
                        // Checked before issuing, not during: in-flight
                        // calls always finish.
                        if stop.is_stopped() {
                            break;
                        }
                        let result = execute_case(client, &case);
                        if result_tx.send((slot, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);
            drop(work_rx);

            // Disconnects once every worker has exited.
            for (slot, result) in &result_rx {
                completed += 1;
                if let Some(observer) = progress.as_ref() {
                    observer(completed, total, &result);
                }
                slots[slot] = Some(result);
            }
        });

        let cases: Vec<CaseResult> = slots.into_iter().flatten().collect();
        // A stop that lands after the final case finished lost nothing; the
        // run only counts as aborted when some filtered case never produced
        // a result.
        let aborted = self.stop.is_stopped() && cases.len() < total;
        Ok(RunRecord {
            run_id,
            started_at,
            finished_at: Utc::now(),
            state: if aborted {
                RunState::Aborted
            } else {
                RunState::Completed
            },
            abort_reason: aborted.then(|| "stopped by operator signal".to_string()),
            categories: executed_categories,
            total_cases: cases.len(),
            cases,
        })
    }
}

/// Filter the corpus to the requested categories; no filter keeps all,
/// preserving corpus order either way.
fn filter_corpus(corpus: &[TestCase], categories: Option<&BTreeSet<String>>) -> Vec<TestCase> {
    corpus
        .iter()
        .filter(|case| categories.is_none_or(|wanted| wanted.contains(&case.category)))
        .cloned()
        .collect()
}

fn collect_categories(cases: &[TestCase]) -> Vec<String> {
    let unique: BTreeSet<&str> = cases.iter().map(|c| c.category.as_str()).collect();
    unique.into_iter().map(str::to_string).collect()
}

/// Run one case end to end: classify, shape-check, then judge severity.
fn execute_case(client: &ClassifierClient, case: &TestCase) -> CaseResult {
    let timed = match client.analyze(&case.message) {
        Ok(timed) => timed,
        Err(error) => return failed_before_classification(case, &error),
    };

    let shape = validate_shape(&timed.body);
    if !shape.is_valid {
        return CaseResult {
            case: case.clone(),
            observed_severity: None,
            observed_confidence: None,
            latency_ms: Some(timed.latency_ms),
            passed: false,
            failure_kind: Some(FailureKind::Shape),
            failure_reason: Some(format!(
                "response violated the service contract ({} error(s))",
                shape.errors.len()
            )),
            validation_errors: shape.errors,
        };
    }

    let response = match ClassifierResponse::from_value(&timed.body) {
        Ok(response) => response,
        Err(error) => {
            return CaseResult {
                case: case.clone(),
                observed_severity: None,
                observed_confidence: None,
                latency_ms: Some(timed.latency_ms),
                passed: false,
                failure_kind: Some(FailureKind::Shape),
                failure_reason: Some(error.to_string()),
                validation_errors: vec![error.to_string()],
            };
        }
    };

    let judgement = validate_severity(
        response.severity,
        &case.expected_severities,
        case.allow_escalation,
        case.allow_deescalation,
    );
    CaseResult {
        case: case.clone(),
        observed_severity: Some(response.severity),
        observed_confidence: Some(response.confidence),
        latency_ms: Some(timed.latency_ms),
        passed: judgement.passed,
        failure_kind: (!judgement.passed).then_some(FailureKind::Mismatch),
        failure_reason: judgement.failure_reason,
        validation_errors: Vec::new(),
    }
}

/// Build the failed case result for errors raised before any response
/// could be judged (exhausted retries, rejected requests, non-JSON bodies).
fn failed_before_classification(case: &TestCase, error: &HarnessError) -> CaseResult {
    let kind = match error {
        HarnessError::ShapeViolation { .. } => FailureKind::Shape,
        _ => FailureKind::Transport,
    };
    CaseResult {
        case: case.clone(),
        observed_severity: None,
        observed_confidence: None,
        latency_ms: None,
        passed: false,
        failure_kind: Some(kind),
        failure_reason: Some(error.to_string()),
        validation_errors: match kind {
            FailureKind::Shape => vec![error.to_string()],
            _ => Vec::new(),
        },
    }
}
