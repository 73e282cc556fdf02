use std::path::PathBuf;

use anyhow::Context;
use mc_engine::{ExperimentConfig, Pipeline};
use mc_models::{AutoregressiveGenerator, MomentFitter};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let path: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: mc-runner <experiment.json>")?;

    let config = ExperimentConfig::from_file(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    let pipeline = Pipeline::new(config, AutoregressiveGenerator::new(), MomentFitter::new())?;
    info!(
        "Running experiment into {} with {} workers",
        pipeline.config().output_directory.display(),
        pipeline.config().pool_size
    );
    let report = pipeline.run()?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
