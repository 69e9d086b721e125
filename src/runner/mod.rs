//! Test runner: drives the corpus through the classifier.

pub mod executor;
