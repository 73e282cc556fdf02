//! Simulation stage followed by the fitting stage that consumes its output.

use std::path::PathBuf;

use mc_design::DesignTableBuilder;
use mc_dispatch::{DispatchSummary, WorkDispatcher, WorkUnit};
use mc_models::{ModelFitter, PopulationGenerator};
use mc_store::JobStore;
use mc_types::{DesignTable, McResult, TableKind};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{stage_name, ExperimentConfig};
use crate::units::{FittingUnit, SimulationUnit};

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub kind: TableKind,
    pub rows: usize,
    pub summary: DispatchSummary,
    pub design_path: PathBuf,
    pub results_path: PathBuf,
    /// Records found in the stage directory when the report was written,
    /// including those from earlier runs.
    pub exported: usize,
}

/// Outcome of a full run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub simulation: StageReport,
    pub fit: Option<StageReport>,
}

/// Builds, persists and executes both stage tables of one experiment.
///
/// Tables are rebuilt from the configuration on every run; the per-row
/// records already on disk decide what is left to execute.
pub struct Pipeline<G, F> {
    config: ExperimentConfig,
    builder: DesignTableBuilder,
    dispatcher: WorkDispatcher,
    store: JobStore,
    simulation: SimulationUnit<G>,
    fitting: FittingUnit<F>,
}

impl<G: PopulationGenerator, F: ModelFitter> Pipeline<G, F> {
    pub fn new(config: ExperimentConfig, generator: G, fitter: F) -> McResult<Self> {
        config.validate()?;
        let dispatcher = WorkDispatcher::new(config.dispatch_config())?;
        let fitting = FittingUnit::new(fitter, config.processor_count);
        Ok(Self {
            builder: DesignTableBuilder::new(),
            dispatcher,
            store: JobStore::new(),
            simulation: SimulationUnit::new(generator),
            fitting,
            config,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Build the simulation table and write its snapshot.
    pub fn simulation_table(&self) -> McResult<DesignTable> {
        let design_path = self.config.design_path(TableKind::Simulation);
        self.builder.build_simulation_table(
            &self.config.conditions,
            &self.config.replicates(),
            self.config.global_seed,
            &self.config.stage_directory(TableKind::Simulation),
            Some(&design_path),
        )
    }

    /// Build the fitting table over `simulation` and write its snapshot.
    pub fn fit_table(&self, simulation: &DesignTable) -> McResult<DesignTable> {
        let table = self.builder.build_dependent_table(
            simulation,
            &self.config.hyperparameters,
            &self.config.stage_directory(TableKind::Dependent),
        )?;
        self.store
            .save_table(&table, &self.config.design_path(TableKind::Dependent))?;
        Ok(table)
    }

    pub fn run_simulation_stage(&self) -> McResult<(DesignTable, StageReport)> {
        let table = self.simulation_table()?;
        let report = self.execute(&table, &self.simulation)?;
        Ok((table, report))
    }

    pub fn run_fit_stage(&self, simulation: &DesignTable) -> McResult<StageReport> {
        let table = self.fit_table(simulation)?;
        self.execute(&table, &self.fitting)
    }

    /// Run the simulation stage, then the fitting stage when hyperparameter
    /// axes are configured.
    pub fn run(&self) -> McResult<PipelineReport> {
        let (simulation_table, simulation) = self.run_simulation_stage()?;
        let fit = if self.config.runs_fit_stage() {
            Some(self.run_fit_stage(&simulation_table)?)
        } else {
            info!("No hyperparameter axes configured, skipping the fit stage");
            None
        };
        Ok(PipelineReport { simulation, fit })
    }

    fn execute<W: WorkUnit>(&self, table: &DesignTable, work: &W) -> McResult<StageReport> {
        let kind = table.kind;
        info!("Starting {} stage: {} rows", stage_name(kind), table.len());

        let summary = self.dispatcher.run(table, work)?;

        let results_path = self.config.results_path(kind);
        let exported = self
            .store
            .export_results_csv(&self.config.stage_directory(kind), &results_path)?;

        Ok(StageReport {
            kind,
            rows: table.len(),
            summary,
            design_path: self.config.design_path(kind),
            results_path,
            exported,
        })
    }
}
