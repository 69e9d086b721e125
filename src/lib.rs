#![forbid(unsafe_code)]

//! Crisis Harness (crh) — regression test harness for a remote crisis-severity
//! text classifier.
//!
//! The engine drives a corpus of labeled test phrases through the classifier
//! with bounded concurrency and retry discipline, judges each response under
//! an escalation/de-escalation tolerance policy, aggregates accuracy and
//! latency statistics, persists immutable named snapshots, and diffs two
//! snapshots into a PASS/WARN/FAIL regression verdict.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use crisis_harness::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use crisis_harness::core::config::Config;
//! use crisis_harness::runner::executor::{TestRunner, RunnerConfig};
//! ```

pub mod prelude;

pub mod analysis;
pub mod client;
pub mod compare;
pub mod core;
pub mod corpus;
pub mod logger;
pub mod model;
pub mod runner;
pub mod snapshot;
pub mod validate;
