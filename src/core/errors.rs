//! CRH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Top-level error type for the crisis harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("[CRH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[CRH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[CRH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[CRH-2001] classifier unreachable after {attempts} attempt(s): {details}")]
    Transport { details: String, attempts: u32 },

    #[error("[CRH-2002] classifier rejected request with status {status}: {details}")]
    PermanentRequest { status: u16, details: String },

    #[error("[CRH-2003] classifier response violates contract: {details}")]
    ShapeViolation { details: String },

    #[error("[CRH-3001] snapshot {id} failed integrity check: {details}")]
    SnapshotIntegrity { id: String, details: String },

    #[error("[CRH-3002] snapshot {id} already exists; snapshots are write-once")]
    SnapshotExists { id: String },

    #[error("[CRH-3003] snapshot {id} not found in {dir}")]
    SnapshotNotFound { id: String, dir: PathBuf },

    #[error("[CRH-3004] invalid snapshot label: {details}")]
    InvalidLabel { details: String },

    #[error("[CRH-4001] invalid corpus in {path}: {details}")]
    InvalidCorpus { path: PathBuf, details: String },

    #[error("[CRH-4002] run aborted: {reason}")]
    RunAborted { reason: String },

    #[error("[CRH-5001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[CRH-5002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[CRH-5003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[CRH-5900] runtime failure: {details}")]
    Runtime { details: String },
}

impl HarnessError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CRH-1001",
            Self::MissingConfig { .. } => "CRH-1002",
            Self::ConfigParse { .. } => "CRH-1003",
            Self::Transport { .. } => "CRH-2001",
            Self::PermanentRequest { .. } => "CRH-2002",
            Self::ShapeViolation { .. } => "CRH-2003",
            Self::SnapshotIntegrity { .. } => "CRH-3001",
            Self::SnapshotExists { .. } => "CRH-3002",
            Self::SnapshotNotFound { .. } => "CRH-3003",
            Self::InvalidLabel { .. } => "CRH-3004",
            Self::InvalidCorpus { .. } => "CRH-4001",
            Self::RunAborted { .. } => "CRH-4002",
            Self::Serialization { .. } => "CRH-5001",
            Self::Io { .. } => "CRH-5002",
            Self::ChannelClosed { .. } => "CRH-5003",
            Self::Runtime { .. } => "CRH-5900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Transport failures are retryable at the client level; the variant
    /// surfacing here means the retry budget was already exhausted, so the
    /// flag describes a fresh attempt (e.g. a whole-run rerun), not another
    /// immediate resend.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::RunAborted { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
