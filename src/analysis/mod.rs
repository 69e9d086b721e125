//! Result analysis: accuracy, error rates, and latency statistics.

pub mod analyzer;
