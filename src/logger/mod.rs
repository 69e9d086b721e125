//! Structured JSONL activity logging.

pub mod jsonl;
