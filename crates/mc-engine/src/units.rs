//! Work units binding design rows to the model crate.

use mc_dispatch::WorkUnit;
use mc_models::{Dataset, FitParams, ModelFitter, PopulationGenerator, PopulationParams};
use mc_store::JobStore;
use mc_types::{DesignRow, JobOutcome, RowExecutionError};
use serde::Serialize;

/// Generates one simulated dataset per row.
#[derive(Debug, Clone)]
pub struct SimulationUnit<G> {
    generator: G,
}

impl<G: PopulationGenerator> SimulationUnit<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }
}

impl<G: PopulationGenerator> WorkUnit for SimulationUnit<G> {
    fn execute(&self, row: &DesignRow) -> Result<serde_json::Value, RowExecutionError> {
        let params = PopulationParams::from_row(row)?;
        let dataset = self.generator.generate(&params)?;
        to_payload(&dataset)
    }
}

/// Fits the dataset written by a row's source simulation job.
#[derive(Debug, Clone)]
pub struct FittingUnit<F> {
    fitter: F,
    processor_count: usize,
    store: JobStore,
}

impl<F: ModelFitter> FittingUnit<F> {
    pub fn new(fitter: F, processor_count: usize) -> Self {
        Self {
            fitter,
            processor_count,
            store: JobStore::new(),
        }
    }

    fn load_dataset(&self, row: &DesignRow) -> Result<Dataset, RowExecutionError> {
        let source = row.source.as_ref().ok_or_else(|| RowExecutionError::MissingInput {
            path: String::new(),
            message: format!("{} names no source dataset", row.output_file),
        })?;
        let path = source.display().to_string();
        let missing = |message: String| RowExecutionError::MissingInput {
            path: path.clone(),
            message,
        };

        let record = self
            .store
            .load_job_result(source)
            .map_err(|e| missing(e.to_string()))?;
        match record.result {
            JobOutcome::Success { payload } => {
                serde_json::from_value(payload).map_err(|e| missing(e.to_string()))
            }
            JobOutcome::Failed { error } => Err(missing(format!("source job failed: {error}"))),
        }
    }
}

impl<F: ModelFitter> WorkUnit for FittingUnit<F> {
    fn execute(&self, row: &DesignRow) -> Result<serde_json::Value, RowExecutionError> {
        let dataset = self.load_dataset(row)?;
        let params = FitParams::from_row(row, self.processor_count)?;
        let artifact = self.fitter.fit(&dataset, &params)?;
        to_payload(&artifact)
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<serde_json::Value, RowExecutionError> {
    serde_json::to_value(value).map_err(|e| RowExecutionError::failed(e.to_string()))
}
