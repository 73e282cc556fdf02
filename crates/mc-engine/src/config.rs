//! Experiment configuration and on-disk layout.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mc_dispatch::DispatchConfig;
use mc_types::{config_error, AxisSet, AxisValue, McResult, TableKind};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable overriding `pool_size`.
pub const POOL_SIZE_ENV: &str = "MCGRID_POOL_SIZE";

/// Everything needed to build and run both stages of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Condition axes of the simulation stage.
    pub conditions: AxisSet,

    /// Hyperparameter axes of the fitting stage. The fitting stage is skipped
    /// when there are none.
    #[serde(default)]
    pub hyperparameters: AxisSet,

    /// Replicates `1..=replicate_count`.
    #[serde(default)]
    pub replicate_count: Option<u32>,

    /// Explicit replicate indices, e.g. to extend an earlier run.
    #[serde(default)]
    pub replicate_indices: Option<Vec<u32>>,

    #[serde(default)]
    pub global_seed: u64,

    pub output_directory: PathBuf,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// First-wave start delay per worker slot.
    #[serde(default)]
    pub stagger_ms: u64,

    /// Threads handed to each fit.
    #[serde(default = "default_processor_count")]
    pub processor_count: usize,
}

fn default_pool_size() -> usize {
    DispatchConfig::default().pool_size
}

fn default_processor_count() -> usize {
    1
}

impl ExperimentConfig {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            conditions: AxisSet::new(),
            hyperparameters: AxisSet::new(),
            replicate_count: None,
            replicate_indices: None,
            global_seed: 0,
            output_directory: output_directory.into(),
            pool_size: default_pool_size(),
            stagger_ms: 0,
            processor_count: default_processor_count(),
        }
    }

    pub fn with_condition(mut self, name: &str, values: Vec<AxisValue>) -> Self {
        self.conditions.insert(name.to_string(), values);
        self
    }

    pub fn with_hyperparameter(mut self, name: &str, values: Vec<AxisValue>) -> Self {
        self.hyperparameters.insert(name.to_string(), values);
        self
    }

    pub fn with_replicates(mut self, count: u32) -> Self {
        self.replicate_count = Some(count);
        self
    }

    pub fn with_replicate_indices(mut self, indices: Vec<u32>) -> Self {
        self.replicate_indices = Some(indices);
        self
    }

    pub fn with_global_seed(mut self, seed: u64) -> Self {
        self.global_seed = seed;
        self
    }

    pub fn with_pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn with_stagger_ms(mut self, ms: u64) -> Self {
        self.stagger_ms = ms;
        self
    }

    pub fn with_processor_count(mut self, n: usize) -> Self {
        self.processor_count = n;
        self
    }

    /// Load a JSON configuration, apply environment overrides and validate.
    pub fn from_file(path: &Path) -> McResult<Self> {
        let text = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&text)?;
        config.apply_pool_size_override(std::env::var(POOL_SIZE_ENV).ok())?;
        config.validate()?;
        info!(
            "Loaded experiment config from {} ({} condition axes, {} hyperparameter axes)",
            path.display(),
            config.conditions.len(),
            config.hyperparameters.len()
        );
        Ok(config)
    }

    fn apply_pool_size_override(&mut self, raw: Option<String>) -> McResult<()> {
        if let Some(raw) = raw {
            self.pool_size = raw.trim().parse().map_err(|_| {
                config_error!("{} must be a positive integer, got '{}'", POOL_SIZE_ENV, raw)
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> McResult<()> {
        if self.conditions.is_empty() {
            return Err(config_error!("at least one condition axis is required"));
        }
        if self.pool_size == 0 {
            return Err(config_error!("pool_size must be at least 1"));
        }
        if self.processor_count == 0 {
            return Err(config_error!("processor_count must be at least 1"));
        }
        match (&self.replicate_count, &self.replicate_indices) {
            (Some(_), Some(_)) => Err(config_error!(
                "set either replicate_count or replicate_indices, not both"
            )),
            (Some(0), None) => Err(config_error!("replicate_count must be at least 1")),
            (None, Some(indices)) if indices.is_empty() => {
                Err(config_error!("replicate_indices must not be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Replicate indices in run order. Defaults to a single replicate.
    pub fn replicates(&self) -> Vec<u32> {
        match (&self.replicate_indices, self.replicate_count) {
            (Some(indices), _) => indices.clone(),
            (None, Some(count)) => (1..=count).collect(),
            (None, None) => vec![1],
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::new(self.pool_size).with_stagger(Duration::from_millis(self.stagger_ms))
    }

    pub fn runs_fit_stage(&self) -> bool {
        !self.hyperparameters.is_empty()
    }

    /// Directory holding one stage's job records.
    pub fn stage_directory(&self, kind: TableKind) -> PathBuf {
        self.output_directory.join(match kind {
            TableKind::Simulation => "simulation",
            TableKind::Dependent => "fit",
        })
    }

    /// JSON snapshot of one stage's table; the CSV export sits next to it.
    pub fn design_path(&self, kind: TableKind) -> PathBuf {
        self.output_directory
            .join(format!("design_{}.json", stage_name(kind)))
    }

    /// Plain-text report of one stage's records.
    pub fn results_path(&self, kind: TableKind) -> PathBuf {
        self.output_directory
            .join(format!("results_{}.csv", stage_name(kind)))
    }
}

pub(crate) fn stage_name(kind: TableKind) -> &'static str {
    match kind {
        TableKind::Simulation => "simulation",
        TableKind::Dependent => "fit",
    }
}
