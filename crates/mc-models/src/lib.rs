//! # mc-models
//!
//! The data-generating and model-fitting side of an experiment. Both stages
//! are pure functions of their typed parameters: a generator turns
//! [`PopulationParams`] into a [`Dataset`], a fitter turns a dataset and
//! [`FitParams`] into a [`FitArtifact`]. Parameters are read from design rows
//! by column name.

mod fitter;
mod generator;
mod params;

use mc_types::RowExecutionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fitter::{FitArtifact, MomentFitter, UnitEstimate};
pub use generator::AutoregressiveGenerator;
pub use params::{FitParams, LevelTwoDistribution, ModelFamily, PopulationParams};

/// Errors raised by generators and fitters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Distribution error: {0}")]
    Distribution(String),

    #[error("Dataset has no observations")]
    EmptyDataset,

    #[error("Model cannot be estimated: {0}")]
    Degenerate(String),
}

impl ModelError {
    pub fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<ModelError> for RowExecutionError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidParameter { name, message } => {
                RowExecutionError::invalid_argument(name, message)
            }
            other => RowExecutionError::failed(other.to_string()),
        }
    }
}

/// Simulated panel: one series per sampled unit, all of equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub model_family: ModelFamily,
    pub seed: u64,
    pub series: Vec<Vec<f64>>,
}

impl Dataset {
    pub fn sample_count(&self) -> usize {
        self.series.len()
    }

    pub fn time_length(&self) -> usize {
        self.series.first().map(Vec::len).unwrap_or(0)
    }

    pub fn observations(&self) -> usize {
        self.series.iter().map(Vec::len).sum()
    }
}

/// Produces a dataset from population parameters.
///
/// Must be deterministic: identical parameters, seed included, give an
/// identical dataset.
pub trait PopulationGenerator: Send + Sync {
    fn generate(&self, params: &PopulationParams) -> Result<Dataset, ModelError>;
}

/// Fits a model to a dataset.
pub trait ModelFitter: Send + Sync {
    fn fit(&self, dataset: &Dataset, params: &FitParams) -> Result<FitArtifact, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameters_keep_their_column() {
        let err: RowExecutionError = ModelError::invalid("phi", "must be below 1").into();
        assert_eq!(
            err,
            RowExecutionError::invalid_argument("phi", "must be below 1")
        );

        let err: RowExecutionError = ModelError::EmptyDataset.into();
        assert!(matches!(err, RowExecutionError::Failed { .. }));
    }

    #[test]
    fn test_dataset_shape() {
        let dataset = Dataset {
            model_family: ModelFamily::Ar,
            seed: 1,
            series: vec![vec![0.0; 30]; 4],
        };
        assert_eq!(dataset.sample_count(), 4);
        assert_eq!(dataset.time_length(), 30);
        assert_eq!(dataset.observations(), 120);
    }
}
