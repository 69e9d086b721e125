//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use crisis_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{HarnessError, Result};

// Model
pub use crate::model::case::{CaseResult, FailureKind, RunRecord, RunState, TestCase};
pub use crate::model::severity::{RecommendedAction, SeverityLevel};

// Client
pub use crate::client::http::{ClassifierClient, ClientConfig};
pub use crate::client::response::{ClassifierResponse, TimedResponse};

// Runner
pub use crate::runner::executor::{RunnerConfig, StopHandle, TestRunner};

// Analysis
pub use crate::analysis::analyzer::{Analysis, AnalyzerConfig, ResultAnalyzer};

// Snapshots and comparison
pub use crate::compare::comparison::{
    CompareConfig, ComparisonResult, Verdict, compare_snapshots,
};
pub use crate::corpus::load_corpus;
pub use crate::snapshot::store::{CaptureMeta, Snapshot, SnapshotStore};
