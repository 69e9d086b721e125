//! Data model shared by the runner, analyzer, and comparison components.

pub mod case;
pub mod severity;
