//! # mc-store
//!
//! Durable persistence for design tables and per-job records. The JSON
//! snapshot is authoritative; CSV files are human-readable exports.
//! Completed jobs are discovered from the files present on disk, never from
//! in-memory state, which is what makes interrupted batches resumable.

mod export;

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use mc_types::{DesignTable, JobRecord, McResult, PersistenceError};
use tracing::{debug, warn};
use uuid::Uuid;

pub use export::{results_to_csv, table_to_csv};

/// File-backed store for tables and job records.
#[derive(Debug, Clone, Default)]
pub struct JobStore;

impl JobStore {
    pub fn new() -> Self {
        Self
    }

    /// Write the JSON snapshot of `table` to `destination` and its CSV
    /// export alongside it (same stem, `.csv`).
    pub fn save_table(&self, table: &DesignTable, destination: &Path) -> McResult<()> {
        let export_path = destination.with_extension("csv");
        if export_path == destination {
            return Err(write_error(
                destination,
                "snapshot destination collides with its CSV export",
            )
            .into());
        }

        let bytes =
            serde_json::to_vec_pretty(table).map_err(|e| write_error(destination, e))?;
        atomic_write(destination, &bytes)?;

        let csv = table_to_csv(table).map_err(|e| write_error(&export_path, e))?;
        atomic_write(&export_path, &csv)?;

        debug!(
            "Saved table with {} rows to {}",
            table.len(),
            destination.display()
        );
        Ok(())
    }

    pub fn load_table(&self, source: &Path) -> McResult<DesignTable> {
        let bytes = fs::read(source).map_err(|e| read_error(source, e))?;
        let table = serde_json::from_slice(&bytes).map_err(|e| corrupt(source, e))?;
        Ok(table)
    }

    /// Persist one finished job as `path/file`. The record becomes visible
    /// under its final name only once it is completely written.
    pub fn save_job_result(&self, record: &JobRecord, path: &Path, file: &str) -> McResult<PathBuf> {
        let target = path.join(file);
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| write_error(&target, e))?;
        atomic_write(&target, &bytes)?;
        Ok(target)
    }

    pub fn load_job_result(&self, path: &Path) -> McResult<JobRecord> {
        let bytes = fs::read(path).map_err(|e| read_error(path, e))?;
        let record = serde_json::from_slice(&bytes).map_err(|e| corrupt(path, e))?;
        Ok(record)
    }

    /// Names of the result files present in `directory`.
    ///
    /// Hidden files (in-flight temporaries) are ignored, and a directory that
    /// does not exist yet simply has no completed jobs.
    pub fn list_completed(&self, directory: &Path) -> McResult<BTreeSet<String>> {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(read_error(directory, e).into()),
        };

        let mut completed = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| read_error(directory, e))?;
            let is_file = entry
                .file_type()
                .map_err(|e| read_error(&entry.path(), e))?
                .is_file();
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    completed.insert(name.to_string());
                }
            }
        }
        Ok(completed)
    }

    /// Load every job record in `directory`, ordered by file name.
    /// Files that are not job records are skipped with a warning.
    pub fn collect_results(&self, directory: &Path) -> McResult<Vec<JobRecord>> {
        let mut records = Vec::new();
        for name in self.list_completed(directory)? {
            let path = directory.join(&name);
            match self.load_job_result(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }

    /// Write the plain-text report of every record in `directory`.
    /// Returns the number of records exported.
    pub fn export_results_csv(&self, directory: &Path, destination: &Path) -> McResult<usize> {
        let records = self.collect_results(directory)?;
        let csv = results_to_csv(&records).map_err(|e| write_error(destination, e))?;
        atomic_write(destination, &csv)?;
        Ok(records.len())
    }
}

/// Temp file in the target directory, fsync, then rename over the target.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| write_error(&parent, e))?;

    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record");
    let tmp = parent.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(write_error(path, e));
    }
    Ok(())
}

fn write_error(path: &Path, err: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Write {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn read_error(path: &Path, err: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn corrupt(path: &Path, err: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Corrupt {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
