//! Factorial expansion of condition and hyperparameter axes into job tables.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

use mc_store::JobStore;
use mc_types::{
    AxisSet, AxisValue, DesignRow, DesignTable, EncodingError, McError, McResult, TableKind,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::seed::SeedEncoder;

/// Naming of the result files a table points at.
#[derive(Debug, Clone, PartialEq)]
pub struct TableOptions {
    pub prefix: String,
    pub extension: String,
    pub separator: String,
}

impl TableOptions {
    pub fn simulation() -> Self {
        Self {
            prefix: "sim".to_string(),
            extension: "json".to_string(),
            separator: "_".to_string(),
        }
    }

    pub fn dependent() -> Self {
        Self {
            prefix: "fit".to_string(),
            ..Self::simulation()
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }
}

/// Builds simulation tables and the dependent tables crossed with them.
#[derive(Debug, Clone)]
pub struct DesignTableBuilder {
    simulation: TableOptions,
    dependent: TableOptions,
}

impl DesignTableBuilder {
    pub fn new() -> Self {
        Self {
            simulation: TableOptions::simulation(),
            dependent: TableOptions::dependent(),
        }
    }

    pub fn with_simulation_options(mut self, options: TableOptions) -> Self {
        self.simulation = options;
        self
    }

    pub fn with_dependent_options(mut self, options: TableOptions) -> Self {
        self.dependent = options;
        self
    }

    /// Expand `axes` times `replicates` into one row per job.
    ///
    /// Replicates vary slowest and the last axis fastest. The table is
    /// checked for seed and filename collisions before it is returned, and
    /// written to `destination` when one is given.
    pub fn build_simulation_table(
        &self,
        axes: &AxisSet,
        replicates: &[u32],
        global_seed: u64,
        output_dir: &Path,
        destination: Option<&Path>,
    ) -> McResult<DesignTable> {
        ensure_non_empty(axes)?;
        if replicates.is_empty() {
            return Err(McError::EmptyAxis {
                axis: "replicate".to_string(),
            });
        }

        let encoder = SeedEncoder::new(axes, global_seed)?;
        debug!(
            "Seed weights {:?} over axes {:?}",
            encoder.weights(),
            axes.keys().collect::<Vec<_>>()
        );

        let combinations = cartesian_product(axes);
        let mut rows = Vec::with_capacity(combinations.len() * replicates.len());
        for &replicate in replicates {
            for conditions in &combinations {
                let seed = encoder.seed(conditions, replicate)?;
                let output_file = self.simulation_file_name(conditions, seed);
                rows.push(DesignRow {
                    conditions: conditions.clone(),
                    hyperparameters: BTreeMap::new(),
                    replicate,
                    seed,
                    output_path: output_dir.to_path_buf(),
                    output_file,
                    source: None,
                });
            }
        }

        let table = DesignTable::new(TableKind::Simulation, global_seed, rows);
        verify_unique_seeds(&table)?;
        verify_unique_files(&table)?;
        info!(
            "Built simulation table: {} rows ({} combinations x {} replicates)",
            table.len(),
            combinations.len(),
            replicates.len()
        );

        if let Some(destination) = destination {
            JobStore::new().save_table(&table, destination)?;
        }
        Ok(table)
    }

    /// Cross every row of `base` with every combination of `secondary`.
    ///
    /// Seeds and replicates are inherited from the base row; filenames are
    /// rebuilt from the secondary values plus the inherited seed and
    /// replicate, which keeps them unique.
    pub fn build_dependent_table(
        &self,
        base: &DesignTable,
        secondary: &AxisSet,
        output_dir: &Path,
    ) -> McResult<DesignTable> {
        ensure_non_empty(secondary)?;
        if base.kind != TableKind::Simulation {
            return Err(McError::Validation(
                "dependent tables must be built from a simulation table".to_string(),
            ));
        }

        let combinations = cartesian_product(secondary);
        let mut rows = Vec::with_capacity(base.len() * combinations.len());
        for base_row in base.iter() {
            for hyperparameters in &combinations {
                let output_file =
                    self.dependent_file_name(hyperparameters, base_row.seed, base_row.replicate);
                rows.push(DesignRow {
                    conditions: base_row.conditions.clone(),
                    hyperparameters: hyperparameters.clone(),
                    replicate: base_row.replicate,
                    seed: base_row.seed,
                    output_path: output_dir.to_path_buf(),
                    output_file,
                    source: Some(base_row.result_path()),
                });
            }
        }

        let table = DesignTable::new(TableKind::Dependent, base.global_seed, rows);
        verify_unique_files(&table)?;
        info!(
            "Built dependent table: {} rows ({} base rows x {} combinations)",
            table.len(),
            base.len(),
            combinations.len()
        );
        Ok(table)
    }

    fn simulation_file_name(&self, conditions: &BTreeMap<String, AxisValue>, seed: u64) -> String {
        let opts = &self.simulation;
        let mut parts = vec![opts.prefix.clone()];
        parts.extend(axis_parts(conditions));
        parts.push(seed.to_string());
        format!("{}.{}", parts.join(&opts.separator), opts.extension)
    }

    fn dependent_file_name(
        &self,
        hyperparameters: &BTreeMap<String, AxisValue>,
        seed: u64,
        replicate: u32,
    ) -> String {
        let opts = &self.dependent;
        let mut parts = vec![opts.prefix.clone()];
        parts.extend(axis_parts(hyperparameters));
        parts.push(format!("seed-{seed}"));
        parts.push(format!("rep-{replicate}"));
        format!("{}.{}", parts.join(&opts.separator), opts.extension)
    }
}

impl Default for DesignTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_non_empty(axes: &AxisSet) -> McResult<()> {
    match axes.iter().find(|(_, values)| values.is_empty()) {
        Some((name, _)) => Err(McError::EmptyAxis { axis: name.clone() }),
        None => Ok(()),
    }
}

fn axis_parts(values: &BTreeMap<String, AxisValue>) -> impl Iterator<Item = String> + '_ {
    values
        .iter()
        .map(|(name, value)| format!("{}-{}", escape(name, false), encode_value(value)))
}

// Numbers print with digits, '.' and '-' only, so their parts never hold '%'.
// A level spelled like a number has its first byte escaped to stay apart.
fn encode_value(value: &AxisValue) -> String {
    match value {
        AxisValue::Number(_) => value.to_string(),
        AxisValue::Level(level) => escape(level, Decimal::from_str(level).is_ok()),
    }
}

/// Percent-escape every byte outside `[A-Za-z0-9.+]`, so distinct texts keep
/// distinct, portable file name parts.
fn escape(text: &str, escape_first: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, byte) in text.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'+');
        if plain && !(escape_first && i == 0) {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Every combination of the axis values; the last axis varies fastest.
/// An empty axis set yields a single empty combination.
pub fn cartesian_product(axes: &AxisSet) -> Vec<BTreeMap<String, AxisValue>> {
    let mut result: Vec<BTreeMap<String, AxisValue>> = vec![BTreeMap::new()];
    for (name, values) in axes {
        let mut next = Vec::with_capacity(result.len() * values.len());
        for existing in &result {
            for value in values {
                let mut combo = existing.clone();
                combo.insert(name.clone(), value.clone());
                next.push(combo);
            }
        }
        result = next;
    }
    result
}

/// Fail if two rows of `table` carry the same seed.
pub fn verify_unique_seeds(table: &DesignTable) -> Result<(), EncodingError> {
    let mut seen: HashMap<u64, &str> = HashMap::with_capacity(table.len());
    for row in table.iter() {
        if let Some(first) = seen.insert(row.seed, &row.output_file) {
            return Err(EncodingError::SeedCollision {
                seed: row.seed,
                first: first.to_string(),
                second: row.output_file.clone(),
            });
        }
    }
    Ok(())
}

/// Fail if two rows of `table` resolve to the same result file.
pub fn verify_unique_files(table: &DesignTable) -> Result<(), EncodingError> {
    let mut seen = std::collections::HashSet::with_capacity(table.len());
    for row in table.iter() {
        if !seen.insert(row.result_path()) {
            return Err(EncodingError::FilenameCollision {
                file: row.output_file.clone(),
            });
        }
    }
    Ok(())
}
