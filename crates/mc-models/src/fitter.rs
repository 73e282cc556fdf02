use std::thread;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::params::{FitParams, ModelFamily};
use crate::{Dataset, ModelError, ModelFitter};

/// Moments of one unit's series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitEstimate {
    pub mean: f64,
    pub variance: f64,
    /// Lag-one autocorrelation; `None` for a constant series.
    pub autocorrelation: Option<f64>,
}

/// Result of fitting one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitArtifact {
    pub output_name: String,
    pub model_family: ModelFamily,
    pub pooled_mean: f64,
    pub between_sd: f64,
    pub pooled_autocorrelation: f64,
    /// Units whose autocorrelation was defined.
    pub estimable_units: usize,
    pub min_iterations: u64,
    pub thinning_interval: u64,
    pub retained_draws: u64,
    pub processor_count: usize,
    pub units: Vec<UnitEstimate>,
}

/// Method-of-moments fitter for lag-one panels.
///
/// Units are split into `processor_count` contiguous chunks estimated on
/// scoped threads; results are reassembled in unit order, so the artifact
/// does not depend on the thread count.
#[derive(Debug, Clone, Copy, Default)]
pub struct MomentFitter;

impl MomentFitter {
    pub fn new() -> Self {
        Self
    }
}

impl ModelFitter for MomentFitter {
    fn fit(&self, dataset: &Dataset, params: &FitParams) -> Result<FitArtifact, ModelError> {
        if params.min_iterations == 0 {
            return Err(ModelError::invalid("iterations", "must be positive"));
        }
        if params.thinning_interval == 0 || params.thinning_interval > params.min_iterations {
            return Err(ModelError::invalid(
                "thin",
                format!(
                    "must be between 1 and the iteration count ({})",
                    params.min_iterations
                ),
            ));
        }
        if dataset.observations() == 0 {
            return Err(ModelError::EmptyDataset);
        }
        if dataset.series.iter().any(|s| s.len() < 2) {
            return Err(ModelError::Degenerate(
                "every unit needs at least two observations".to_string(),
            ));
        }

        let units = estimate_units(&dataset.series, params.processor_count);

        let n = units.len() as f64;
        let pooled_mean = units.iter().map(|u| u.mean).sum::<f64>() / n;
        let between_sd = if units.len() > 1 {
            (units
                .iter()
                .map(|u| (u.mean - pooled_mean).powi(2))
                .sum::<f64>()
                / (n - 1.0))
                .sqrt()
        } else {
            0.0
        };

        let defined: Vec<f64> = units.iter().filter_map(|u| u.autocorrelation).collect();
        if defined.is_empty() {
            return Err(ModelError::Degenerate(
                "no unit varies over time".to_string(),
            ));
        }
        let pooled_autocorrelation = defined.iter().sum::<f64>() / defined.len() as f64;

        debug!(
            "Fitted {}: phi {:.4} over {} of {} units",
            params.output_name,
            pooled_autocorrelation,
            defined.len(),
            units.len()
        );

        Ok(FitArtifact {
            output_name: params.output_name.clone(),
            model_family: dataset.model_family,
            pooled_mean,
            between_sd,
            pooled_autocorrelation,
            estimable_units: defined.len(),
            min_iterations: params.min_iterations,
            thinning_interval: params.thinning_interval,
            retained_draws: params.retained_draws(),
            processor_count: params.processor_count,
            units,
        })
    }
}

fn estimate_units(series: &[Vec<f64>], processor_count: usize) -> Vec<UnitEstimate> {
    let workers = processor_count.clamp(1, series.len().max(1));
    if workers == 1 {
        return series.iter().map(|s| estimate_unit(s)).collect();
    }

    let chunk = series.len().div_ceil(workers);
    thread::scope(|scope| {
        let handles: Vec<_> = series
            .chunks(chunk)
            .map(|part| {
                scope.spawn(move || part.iter().map(|s| estimate_unit(s)).collect::<Vec<_>>())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(estimates) => estimates,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    })
}

fn estimate_unit(series: &[f64]) -> UnitEstimate {
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let denominator: f64 = series.iter().map(|y| (y - mean).powi(2)).sum();
    let numerator: f64 = series
        .windows(2)
        .map(|w| (w[1] - mean) * (w[0] - mean))
        .sum();

    UnitEstimate {
        mean,
        variance: denominator / n,
        autocorrelation: (denominator > 0.0).then(|| numerator / denominator),
    }
}
