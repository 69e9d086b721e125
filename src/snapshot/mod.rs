//! Write-once snapshot persistence for run records and analyses.

pub mod store;
