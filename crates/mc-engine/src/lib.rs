//! # mc-engine
//!
//! Wires the design, dispatch, storage and model crates into a two-stage
//! experiment: simulate one dataset per condition row, then fit every
//! dataset once per hyperparameter combination.

pub mod config;
pub mod pipeline;
pub mod units;

pub use config::{ExperimentConfig, POOL_SIZE_ENV};
pub use pipeline::{Pipeline, PipelineReport, StageReport};
pub use units::{FittingUnit, SimulationUnit};
