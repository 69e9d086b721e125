//! Corpus loading: a JSON array of test cases supplied by collaborators.
//!
//! The corpus file is an external contract, so validation failures name the
//! offending entry by index instead of pointing at a serde line number.

use std::fs;
use std::path::Path;

use crate::core::errors::{HarnessError, Result};
use crate::model::case::TestCase;

/// Load and validate a corpus file. Order is preserved.
pub fn load_corpus(path: &Path) -> Result<Vec<TestCase>> {
    let raw = fs::read_to_string(path).map_err(|error| HarnessError::io(path, error))?;
    let cases: Vec<TestCase> =
        serde_json::from_str(&raw).map_err(|error| HarnessError::InvalidCorpus {
            path: path.to_path_buf(),
            details: format!("not a JSON array of test cases: {error}"),
        })?;

    for (index, case) in cases.iter().enumerate() {
        validate_case(case).map_err(|details| HarnessError::InvalidCorpus {
            path: path.to_path_buf(),
            details: format!("case {index}: {details}"),
        })?;
    }
    Ok(cases)
}

fn validate_case(case: &TestCase) -> std::result::Result<(), String> {
    if case.message.trim().is_empty() {
        return Err("message must be non-empty".to_string());
    }
    if case.expected_severities.is_empty() {
        return Err("expected_severities must name at least one level".to_string());
    }
    if case.category.trim().is_empty() {
        return Err("category must be non-empty".to_string());
    }
    Ok(())
}
