use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PassKError, Result};
use crate::estimator::{DEFAULT_PRECISION, MAX_PRECISION};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub aggregate: AggregateConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl EvalConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EvalConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.aggregate.validate()?;
        if self.runner.concurrency == 0 {
            return Err(PassKError::Config("runner.concurrency must be >= 1".into()));
        }
        if self.runner.timeout_ms == 0 {
            return Err(PassKError::Config("runner.timeout_ms must be >= 1".into()));
        }
        Ok(())
    }
}

pub fn validate_ks(ks: &[u32]) -> Result<()> {
    if ks.is_empty() {
        return Err(PassKError::Config("at least one k value is required".into()));
    }
    if let Some(&k) = ks.iter().find(|&&k| k == 0) {
        return Err(PassKError::InvalidK(k));
    }
    for (i, k) in ks.iter().enumerate() {
        if ks[..i].contains(k) {
            return Err(PassKError::Config(format!("k value {} listed more than once", k)));
        }
    }
    Ok(())
}

fn default_ks() -> Vec<u32> {
    vec![1, 5]
}

fn default_precision() -> u32 {
    DEFAULT_PRECISION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    #[serde(default = "default_ks")]
    pub ks: Vec<u32>,
    #[serde(default = "default_precision")]
    pub precision: u32,
}

impl AggregateConfig {
    pub fn validate(&self) -> Result<()> {
        validate_ks(&self.ks)?;
        if self.precision > MAX_PRECISION {
            return Err(PassKError::Config(format!(
                "aggregate.precision must be <= {} (got {})",
                MAX_PRECISION, self.precision
            )));
        }
        Ok(())
    }
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            ks: default_ks(),
            precision: default_precision(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub python: String,
    pub reference_module: PathBuf,
    pub tests_dir: PathBuf,
    pub timeout_ms: u64,
    pub concurrency: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            reference_module: PathBuf::from("problems/problems.py"),
            tests_dir: PathBuf::from("tests"),
            timeout_ms: 30_000,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Truncate on open: the store is a single run's ledger.
    #[default]
    Overwrite,
    /// Keep existing lines: the store is a durable cross-run log.
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub results_path: PathBuf,
    pub metrics_path: PathBuf,
    pub mode: StoreMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            results_path: PathBuf::from("runs/results.jsonl"),
            metrics_path: PathBuf::from("runs/metrics.json"),
            mode: StoreMode::default(),
        }
    }
}
