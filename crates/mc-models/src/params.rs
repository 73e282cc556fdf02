use std::fmt;
use std::path::Path;
use std::str::FromStr;

use mc_types::{AxisValue, DesignRow, RowExecutionError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Data-generating process of a simulated panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Binomial-thinning INAR(1) counts.
    #[serde(rename = "BinAR")]
    BinAr,
    /// Discrete AR(1): repeat the last count or redraw from the marginal.
    #[serde(rename = "DAR")]
    Dar,
    /// Gaussian AR(1).
    #[serde(rename = "AR")]
    Ar,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BinAr => "BinAR",
            Self::Dar => "DAR",
            Self::Ar => "AR",
        }
    }

    pub fn is_count(&self) -> bool {
        matches!(self, Self::BinAr | Self::Dar)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binar" => Ok(Self::BinAr),
            "dar" => Ok(Self::Dar),
            "ar" => Ok(Self::Ar),
            _ => Err(ModelError::invalid(
                "Model",
                format!("unknown model family '{s}'"),
            )),
        }
    }
}

/// Distribution of the unit-level means around the population mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelTwoDistribution {
    #[default]
    Normal,
    Uniform,
    /// Every unit shares the population mean.
    Fixed,
}

impl FromStr for LevelTwoDistribution {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "uniform" => Ok(Self::Uniform),
            "fixed" | "none" => Ok(Self::Fixed),
            _ => Err(ModelError::invalid(
                "L2",
                format!("unknown level-two distribution '{s}'"),
            )),
        }
    }
}

/// Arguments of one population draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationParams {
    pub model_family: ModelFamily,
    pub sample_count: usize,
    pub time_length: usize,
    pub autocorrelation: f64,
    pub level_two_distribution: LevelTwoDistribution,
    pub seed: u64,
}

impl PopulationParams {
    /// Read `Model`, `N`, `T`, `phi` and the optional `L2` column from a
    /// simulation row; the seed is the row's own.
    pub fn from_row(row: &DesignRow) -> Result<Self, RowExecutionError> {
        let model_family = level(row, "Model")?.parse::<ModelFamily>()?;
        let level_two_distribution = match row.value("L2") {
            Some(_) => level(row, "L2")?.parse::<LevelTwoDistribution>()?,
            None => LevelTwoDistribution::default(),
        };

        Ok(Self {
            model_family,
            sample_count: count(row, "N")?,
            time_length: count(row, "T")?,
            autocorrelation: real(row, "phi")?,
            level_two_distribution,
            seed: row.seed,
        })
    }
}

/// Arguments of one model fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    pub processor_count: usize,
    pub min_iterations: u64,
    pub thinning_interval: u64,
    pub output_name: String,
}

impl FitParams {
    /// Read the `iterations` and `thin` hyperparameters from a fitting row.
    /// The artifact is named after the row's output file.
    pub fn from_row(row: &DesignRow, processor_count: usize) -> Result<Self, RowExecutionError> {
        let output_name = Path::new(&row.output_file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(row.output_file.as_str())
            .to_string();

        Ok(Self {
            processor_count: processor_count.max(1),
            min_iterations: count(row, "iterations")? as u64,
            thinning_interval: count(row, "thin")? as u64,
            output_name,
        })
    }

    /// Draws kept after thinning.
    pub fn retained_draws(&self) -> u64 {
        if self.thinning_interval == 0 {
            0
        } else {
            self.min_iterations / self.thinning_interval
        }
    }
}

fn lookup<'a>(row: &'a DesignRow, column: &str) -> Result<&'a AxisValue, RowExecutionError> {
    row.value(column)
        .ok_or_else(|| RowExecutionError::invalid_argument(column, "column missing from row"))
}

fn level<'a>(row: &'a DesignRow, column: &str) -> Result<&'a str, RowExecutionError> {
    lookup(row, column)?.as_level().ok_or_else(|| {
        RowExecutionError::invalid_argument(column, "expected a categorical level")
    })
}

fn number(row: &DesignRow, column: &str) -> Result<Decimal, RowExecutionError> {
    lookup(row, column)?
        .as_decimal()
        .ok_or_else(|| RowExecutionError::invalid_argument(column, "expected a number"))
}

fn count(row: &DesignRow, column: &str) -> Result<usize, RowExecutionError> {
    let value = number(row, column)?;
    if !value.fract().is_zero() {
        return Err(RowExecutionError::invalid_argument(
            column,
            format!("expected a whole number, got {value}"),
        ));
    }
    match value.to_usize() {
        Some(n) if n > 0 => Ok(n),
        _ => Err(RowExecutionError::invalid_argument(
            column,
            format!("expected a positive count, got {value}"),
        )),
    }
}

fn real(row: &DesignRow, column: &str) -> Result<f64, RowExecutionError> {
    let value = number(row, column)?;
    value.to_f64().ok_or_else(|| {
        RowExecutionError::invalid_argument(column, format!("{value} is not representable"))
    })
}
