//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analysis::analyzer::AnalyzerConfig;
use crate::client::http::ClientConfig;
use crate::compare::comparison::CompareConfig;
use crate::core::errors::{HarnessError, Result};
use crate::runner::executor::RunnerConfig;

/// Full harness configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub runner: RunnerConfig,
    pub analyzer: AnalyzerConfig,
    pub compare: CompareConfig,
    pub paths: PathsConfig,
}

/// Filesystem paths used by the harness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub snapshot_dir: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[CRH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir
            .join(".config")
            .join("crisis-harness")
            .join("config.toml");
        let data = home_dir.join(".local").join("share").join("crisis-harness");
        Self {
            config_file: cfg,
            snapshot_dir: data.join("snapshots"),
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from the default
    /// path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HarnessError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(HarnessError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        // client
        if let Some(raw) = env_var("CRH_CLIENT_BASE_URL") {
            self.client.base_url = raw;
        }
        set_env_u64("CRH_CLIENT_TIMEOUT_MS", &mut self.client.timeout_ms)?;
        set_env_u32("CRH_CLIENT_MAX_ATTEMPTS", &mut self.client.max_attempts)?;
        set_env_u64(
            "CRH_CLIENT_BACKOFF_BASE_MS",
            &mut self.client.backoff_base_ms,
        )?;
        set_env_u64("CRH_CLIENT_BACKOFF_CAP_MS", &mut self.client.backoff_cap_ms)?;

        // runner
        set_env_usize("CRH_RUNNER_CONCURRENCY", &mut self.runner.concurrency)?;
        set_env_bool("CRH_RUNNER_HEALTH_CHECK", &mut self.runner.health_check)?;

        // analyzer
        set_env_f64(
            "CRH_ANALYZER_DEFAULT_TARGET_RATE",
            &mut self.analyzer.default_target_rate,
        )?;

        // compare
        set_env_f64(
            "CRH_COMPARE_DEFAULT_REGRESSION_THRESHOLD_PCT",
            &mut self.compare.default_regression_threshold_pct,
        )?;

        // paths
        if let Some(raw) = env_var("CRH_SNAPSHOT_DIR") {
            self.paths.snapshot_dir = PathBuf::from(raw);
        }
        if let Some(raw) = env_var("CRH_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.client.base_url.trim().is_empty() {
            return Err(HarnessError::InvalidConfig {
                details: "client.base_url must be non-empty".to_string(),
            });
        }
        if !self.client.base_url.starts_with("http://")
            && !self.client.base_url.starts_with("https://")
        {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "client.base_url must start with http:// or https://, got {:?}",
                    self.client.base_url
                ),
            });
        }
        if self.client.timeout_ms == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "client.timeout_ms must be > 0".to_string(),
            });
        }
        if self.client.max_attempts == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "client.max_attempts must be >= 1".to_string(),
            });
        }
        if self.client.backoff_base_ms > self.client.backoff_cap_ms {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "client.backoff_base_ms ({}) must be <= backoff_cap_ms ({})",
                    self.client.backoff_base_ms, self.client.backoff_cap_ms
                ),
            });
        }

        if self.runner.concurrency == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "runner.concurrency must be >= 1".to_string(),
            });
        }

        validate_prob(
            "analyzer.default_target_rate",
            self.analyzer.default_target_rate,
        )?;
        for (name, target) in &self.analyzer.category_targets {
            validate_prob(
                &format!("analyzer.category_targets.{name}.target_rate"),
                target.target_rate,
            )?;
        }

        if self.compare.default_regression_threshold_pct < 0.0 {
            return Err(HarnessError::InvalidConfig {
                details: "compare.default_regression_threshold_pct must be >= 0".to_string(),
            });
        }
        for (name, threshold) in &self.compare.category_thresholds {
            if *threshold < 0.0 {
                return Err(HarnessError::InvalidConfig {
                    details: format!(
                        "compare.category_thresholds.{name} must be >= 0, got {threshold}"
                    ),
                });
            }
        }

        Ok(())
    }
}

fn validate_prob(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(HarnessError::InvalidConfig {
            details: format!("{name} must be in [0,1], got {value}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_env_f64(name: &str, slot: &mut f64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<f64>()
            .map_err(|error| HarnessError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn set_env_u64(name: &str, slot: &mut u64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<u64>()
            .map_err(|error| HarnessError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn set_env_u32(name: &str, slot: &mut u32) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<u32>()
            .map_err(|error| HarnessError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn set_env_usize(name: &str, slot: &mut usize) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<usize>()
            .map_err(|error| HarnessError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn set_env_bool(name: &str, slot: &mut bool) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<bool>()
            .map_err(|error| HarnessError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}
