//! File-backed snapshot store: one JSON document per snapshot.
//!
//! Snapshots are write-once. The id is derived from the label plus the
//! capture timestamp, collisions refuse rather than overwrite, and writes
//! go through a temp file and atomic rename so a crash never leaves a
//! half-written snapshot behind.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::analyzer::Analysis;
use crate::core::errors::{HarnessError, Result};
use crate::model::case::RunRecord;

/// Current on-disk snapshot format.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Operator-supplied context recorded at capture time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureMeta {
    /// Version string reported for the classifier under test, if known.
    pub classifier_version: Option<String>,
    /// Source revision of the classifier under test, if known.
    pub commit: Option<String>,
    /// Free-form model configuration description.
    pub model_config: Option<String>,
    /// Free-form operator note.
    pub description: Option<String>,
}

/// Snapshot header: identity plus capture context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    pub label: String,
    pub captured_at: DateTime<Utc>,
    pub format_version: u32,
    #[serde(flatten)]
    pub capture: CaptureMeta,
}

/// One persisted capture: header, full run record, and derived analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub run: RunRecord,
    pub analysis: Analysis,
}

/// One line of `list` output; cheap to build, no case payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: String,
    pub label: String,
    pub captured_at: DateTime<Utc>,
    pub total_cases: usize,
    pub overall_accuracy: f64,
}

/// Directory of write-once snapshot files.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a run and its analysis under a fresh id derived from `label`.
    ///
    /// Refuses with `SnapshotExists` if the derived id is already taken;
    /// never overwrites.
    pub fn capture(
        &self,
        label: &str,
        capture: CaptureMeta,
        run: &RunRecord,
        analysis: &Analysis,
    ) -> Result<SnapshotMeta> {
        self.capture_at(label, Utc::now(), capture, run, analysis)
    }

    fn capture_at(
        &self,
        label: &str,
        captured_at: DateTime<Utc>,
        capture: CaptureMeta,
        run: &RunRecord,
        analysis: &Analysis,
    ) -> Result<SnapshotMeta> {
        validate_label(label)?;
        let id = format!("{label}-{}", captured_at.format("%Y%m%dT%H%M%S%.3fZ"));
        let path = self.snapshot_path(&id);
        if path.exists() {
            return Err(HarnessError::SnapshotExists { id });
        }

        let meta = SnapshotMeta {
            id: id.clone(),
            label: label.to_string(),
            captured_at,
            format_version: SNAPSHOT_FORMAT_VERSION,
            capture,
        };
        let snapshot = Snapshot {
            meta: meta.clone(),
            run: run.clone(),
            analysis: analysis.clone(),
        };

        fs::create_dir_all(&self.dir).map_err(|error| HarnessError::io(&self.dir, error))?;
        let data = serde_json::to_vec_pretty(&snapshot)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, data).map_err(|error| HarnessError::io(&tmp_path, error))?;
        fs::rename(&tmp_path, &path).map_err(|error| HarnessError::io(&path, error))?;
        Ok(meta)
    }

    /// Load and integrity-check one snapshot by id.
    pub fn load(&self, id: &str) -> Result<Snapshot> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Err(HarnessError::SnapshotNotFound {
                id: id.to_string(),
                dir: self.dir.clone(),
            });
        }
        let raw = fs::read_to_string(&path).map_err(|error| HarnessError::io(&path, error))?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|error| HarnessError::SnapshotIntegrity {
                id: id.to_string(),
                details: format!("not valid JSON: {error}"),
            })?;
        validate_snapshot_value(id, &value)?;
        serde_json::from_value(value).map_err(|error| HarnessError::SnapshotIntegrity {
            id: id.to_string(),
            details: format!("failed to deserialize: {error}"),
        })
    }

    /// Integrity-check a snapshot without keeping it.
    pub fn validate(&self, id: &str) -> Result<()> {
        self.load(id).map(|_| ())
    }

    /// Summaries of every snapshot in the directory, sorted by id.
    ///
    /// A corrupt file is an error, not a skip: a store holding unreadable
    /// baselines should be loud about it.
    pub fn list(&self) -> Result<Vec<SnapshotSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.dir).map_err(|error| HarnessError::io(&self.dir, error))?;

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| HarnessError::io(&self.dir, error))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let snapshot = self.load(id)?;
            summaries.push(SnapshotSummary {
                id: snapshot.meta.id,
                label: snapshot.meta.label,
                captured_at: snapshot.meta.captured_at,
                total_cases: snapshot.run.total_cases,
                overall_accuracy: snapshot.analysis.overall_accuracy,
            });
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    /// Delete one snapshot by id. Missing id is an error.
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Err(HarnessError::SnapshotNotFound {
                id: id.to_string(),
                dir: self.dir.clone(),
            });
        }
        fs::remove_file(&path).map_err(|error| HarnessError::io(&path, error))
    }

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

/// Labels become filename prefixes, so keep them to a safe alphabet.
fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(HarnessError::InvalidLabel {
            details: "label must be non-empty".to_string(),
        });
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(HarnessError::InvalidLabel {
            details: format!(
                "label {label:?} may only contain ASCII alphanumerics, '-', '_', and '.'"
            ),
        });
    }
    Ok(())
}

/// Structural integrity check before full deserialization, so a truncated
/// or hand-edited file reports the missing keys by name.
fn validate_snapshot_value(id: &str, value: &serde_json::Value) -> Result<()> {
    let Some(object) = value.as_object() else {
        return Err(HarnessError::SnapshotIntegrity {
            id: id.to_string(),
            details: "top level is not a JSON object".to_string(),
        });
    };

    let missing: Vec<&str> = ["meta", "run", "analysis"]
        .into_iter()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(HarnessError::SnapshotIntegrity {
            id: id.to_string(),
            details: format!("missing top-level keys: {}", missing.join(", ")),
        });
    }

    let Some(meta) = object["meta"].as_object() else {
        return Err(HarnessError::SnapshotIntegrity {
            id: id.to_string(),
            details: "meta is not a JSON object".to_string(),
        });
    };
    let missing_meta: Vec<&str> = ["id", "label", "captured_at", "format_version"]
        .into_iter()
        .filter(|key| !meta.contains_key(*key))
        .collect();
    if !missing_meta.is_empty() {
        return Err(HarnessError::SnapshotIntegrity {
            id: id.to_string(),
            details: format!("missing meta keys: {}", missing_meta.join(", ")),
        });
    }
    Ok(())
}
