//! Two-snapshot comparison and the release verdict derived from it.

pub mod comparison;
