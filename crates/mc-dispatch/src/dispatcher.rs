//! Fixed-size worker pool over a shared queue of pending rows.
//!
//! Rows whose output file already exists are skipped up front. The rest are
//! pushed onto one MPMC queue that every worker pulls from, so a worker that
//! finishes early takes the next row instead of idling behind a static
//! partition. Each worker writes its own job records and reports back over a
//! result channel.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use mc_store::JobStore;
use mc_types::{
    config_error, internal_error, DesignRow, DesignTable, EncodingError, JobOutcome, JobRecord,
    McError, McResult, PersistenceError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::work::{execute_guarded, OutputResolver, TableResolver, WorkUnit};

/// Pool sizing and start-up smoothing.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub pool_size: usize,
    /// Per-slot delay for the first wave of rows, so workers do not hit a
    /// shared downstream resource at the same instant.
    pub stagger: Duration,
}

impl DispatchConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            stagger: Duration::ZERO,
        }
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn validate(&self) -> McResult<()> {
        if self.pool_size == 0 {
            return Err(config_error!("pool_size must be at least 1"));
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new(thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}

/// A job record that could not be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceFailure {
    pub output_file: String,
    pub message: String,
}

/// Aggregate outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub total: usize,
    pub skipped: usize,
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub workers: usize,
    pub elapsed_ms: u64,
    pub persistence_failures: Vec<PersistenceFailure>,
}

impl DispatchSummary {
    fn absorb(&mut self, report: WorkerReport) {
        self.executed += 1;
        if report.succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        if let Err(message) = report.persisted {
            error!("Could not persist {}: {}", report.output_file, message);
            self.persistence_failures.push(PersistenceFailure {
                output_file: report.output_file,
                message,
            });
        }
    }

    /// Surface persistence failures as an error; row failures are part of a
    /// successful dispatch.
    pub fn into_result(self) -> McResult<Self> {
        match self.persistence_failures.first() {
            None => Ok(self),
            Some(first) => Err(PersistenceError::Batch {
                failed: self.persistence_failures.len(),
                first: format!("{}: {}", first.output_file, first.message),
            }
            .into()),
        }
    }
}

/// A row handed to exactly one worker.
#[derive(Debug)]
pub struct PendingJob<'a> {
    pub position: usize,
    pub row: &'a DesignRow,
    pub directory: PathBuf,
    pub file: String,
}

/// What a worker sends back after finishing a row.
#[derive(Debug)]
struct WorkerReport {
    output_file: String,
    succeeded: bool,
    persisted: Result<PathBuf, String>,
}

/// Executes design tables against a worker pool.
#[derive(Debug, Clone)]
pub struct WorkDispatcher {
    config: DispatchConfig,
    store: JobStore,
}

impl WorkDispatcher {
    pub fn new(config: DispatchConfig) -> McResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store: JobStore::new(),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Rows of `table` whose result file is not on disk yet, in table order.
    pub fn pending<'a, R: OutputResolver + ?Sized>(
        &self,
        table: &'a DesignTable,
        resolver: &R,
    ) -> McResult<Vec<PendingJob<'a>>> {
        let mut completed: HashMap<PathBuf, BTreeSet<String>> = HashMap::new();
        let mut targets = HashSet::with_capacity(table.len());
        let mut pending = Vec::new();

        for row in table.iter() {
            let target = resolver.resolve(row);
            let (directory, file) = split_target(&target)?;
            if !targets.insert(target.clone()) {
                return Err(EncodingError::FilenameCollision { file }.into());
            }

            if !completed.contains_key(&directory) {
                let listed = self.store.list_completed(&directory)?;
                completed.insert(directory.clone(), listed);
            }
            let done = completed
                .get(&directory)
                .map(|names| names.contains(&file))
                .unwrap_or(false);
            if done {
                debug!("Skipping {}: output already present", target.display());
                continue;
            }

            pending.push(PendingJob {
                position: pending.len(),
                row,
                directory,
                file,
            });
        }
        Ok(pending)
    }

    /// Run every pending row of `table` through `work`, writing records where
    /// the table says.
    pub fn run<W: WorkUnit + ?Sized>(
        &self,
        table: &DesignTable,
        work: &W,
    ) -> McResult<DispatchSummary> {
        self.run_with_resolver(table, work, &TableResolver)
    }

    /// Run every pending row of `table` through `work`, writing each record
    /// to `resolver(row)`.
    ///
    /// A failing or panicking work unit is recorded in that row's record and
    /// the batch continues. Records that cannot be written are reported as a
    /// `PersistenceError` once the pool has drained.
    pub fn run_with_resolver<W, R>(
        &self,
        table: &DesignTable,
        work: &W,
        resolver: &R,
    ) -> McResult<DispatchSummary>
    where
        W: WorkUnit + ?Sized,
        R: OutputResolver + ?Sized,
    {
        let started = Instant::now();
        let pending = self.pending(table, resolver)?;

        let mut summary = DispatchSummary {
            total: table.len(),
            skipped: table.len() - pending.len(),
            ..DispatchSummary::default()
        };
        info!(
            "Dispatching {} of {} rows ({} already complete)",
            pending.len(),
            summary.total,
            summary.skipped
        );
        if pending.is_empty() {
            return Ok(summary);
        }

        let pool_size = self.config.pool_size;
        let workers = pool_size.min(pending.len());
        summary.workers = workers;

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<PendingJob<'_>>();
        let (report_tx, report_rx) = crossbeam_channel::unbounded::<WorkerReport>();
        for job in pending {
            job_tx
                .send(job)
                .map_err(|_| internal_error!("job queue closed before dispatch"))?;
        }
        drop(job_tx);

        let store = &self.store;
        let stagger = self.config.stagger;
        thread::scope(|scope| {
            for worker in 0..workers {
                let jobs = job_rx.clone();
                let reports = report_tx.clone();
                scope.spawn(move || {
                    worker_loop(worker, pool_size, stagger, jobs, reports, work, store)
                });
            }
            drop(report_tx);

            for report in report_rx.iter() {
                summary.absorb(report);
            }
        });

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Dispatch finished: {} executed ({} ok, {} failed), {} skipped in {} ms",
            summary.executed, summary.succeeded, summary.failed, summary.skipped, summary.elapsed_ms
        );
        summary.into_result()
    }
}

fn worker_loop<W: WorkUnit + ?Sized>(
    worker: usize,
    pool_size: usize,
    stagger: Duration,
    jobs: Receiver<PendingJob<'_>>,
    reports: Sender<WorkerReport>,
    work: &W,
    store: &JobStore,
) {
    for job in jobs.iter() {
        if job.position < pool_size && !stagger.is_zero() {
            thread::sleep(stagger * (job.position % pool_size) as u32);
        }

        debug!("Worker {} starting {}", worker, job.file);
        let start_time = Utc::now();
        let outcome = JobOutcome::from(execute_guarded(work, job.row));
        let end_time = Utc::now();

        if let JobOutcome::Failed { error } = &outcome {
            warn!("Row {} failed: {}", job.file, error);
        }
        let succeeded = outcome.is_success();

        let record = JobRecord::new(job.row.clone(), start_time, end_time, worker, outcome);
        let persisted = store
            .save_job_result(&record, &job.directory, &job.file)
            .map_err(|e| e.to_string());

        let report = WorkerReport {
            output_file: job.file,
            succeeded,
            persisted,
        };
        if reports.send(report).is_err() {
            break;
        }
    }
}

fn split_target(target: &Path) -> McResult<(PathBuf, String)> {
    let file = target
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| {
            McError::Validation(format!(
                "output location {} has no file name",
                target.display()
            ))
        })?
        .to_string();
    let directory = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((directory, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_types::{AxisValue, RowExecutionError, TableKind};
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn table(dir: &Path, n: u64) -> DesignTable {
        let rows = (0..n)
            .map(|i| {
                let mut conditions = BTreeMap::new();
                conditions.insert("N".to_string(), AxisValue::from(i as i64));
                DesignRow {
                    conditions,
                    hyperparameters: BTreeMap::new(),
                    replicate: 1,
                    seed: 1000 + i,
                    output_path: dir.to_path_buf(),
                    output_file: format!("sim_N-{i}_{}.json", 1000 + i),
                    source: None,
                }
            })
            .collect();
        DesignTable::new(TableKind::Simulation, 0, rows)
    }

    fn echo(row: &DesignRow) -> Result<serde_json::Value, RowExecutionError> {
        Ok(serde_json::json!({ "seed": row.seed }))
    }

    fn dispatcher(pool_size: usize) -> WorkDispatcher {
        WorkDispatcher::new(DispatchConfig::new(pool_size)).unwrap()
    }

    #[test]
    fn test_every_row_gets_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 12);

        let summary = dispatcher(4).run(&table, &echo).unwrap();
        assert_eq!(summary.total, 12);
        assert_eq!(summary.executed, 12);
        assert_eq!(summary.succeeded, 12);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.workers, 4);

        let store = JobStore::new();
        for row in table.iter() {
            let record = store.load_job_result(&row.result_path()).unwrap();
            assert_eq!(&record.row, row);
            assert_eq!(
                record.result.payload(),
                Some(&serde_json::json!({ "seed": row.seed }))
            );
            assert!(record.end_time >= record.start_time);
            assert!(record.worker < 4);
        }
    }

    #[test]
    fn test_existing_outputs_are_skipped_and_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 10);
        let preexisting: Vec<&DesignRow> = table.iter().step_by(3).collect();
        for row in &preexisting {
            fs::write(row.result_path(), b"from an earlier run").unwrap();
        }

        let calls = AtomicUsize::new(0);
        let work = |row: &DesignRow| {
            calls.fetch_add(1, Ordering::SeqCst);
            echo(row)
        };
        let summary = dispatcher(3).run(&table, &work).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 10 - preexisting.len());
        assert_eq!(summary.executed, 10 - preexisting.len());
        assert_eq!(summary.skipped, preexisting.len());
        for row in preexisting {
            assert_eq!(fs::read(row.result_path()).unwrap(), b"from an earlier run");
        }

        // A second pass finds everything done.
        let again = dispatcher(3).run(&table, &work).unwrap();
        assert_eq!(again.executed, 0);
        assert_eq!(again.skipped, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 10 - 4);
    }

    #[test]
    fn test_one_failing_row_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 8);
        let work = |row: &DesignRow| {
            if row.seed == 1005 {
                Err(RowExecutionError::failed("did not converge"))
            } else {
                echo(row)
            }
        };

        let summary = dispatcher(2).run(&table, &work).unwrap();
        assert_eq!(summary.executed, 8);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 7);

        let records = JobStore::new().collect_results(dir.path()).unwrap();
        assert_eq!(records.len(), 8);
        for record in records {
            if record.row.seed == 1005 {
                assert_eq!(
                    record.result.error(),
                    Some(&RowExecutionError::failed("did not converge"))
                );
            } else {
                assert!(record.result.is_success());
            }
        }
    }

    #[test]
    fn test_panicking_row_is_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 4);
        let work = |row: &DesignRow| {
            if row.seed == 1002 {
                panic!("index out of range in sampler");
            }
            echo(row)
        };

        let summary = dispatcher(2).run(&table, &work).unwrap();
        assert_eq!(summary.executed, 4);
        assert_eq!(summary.failed, 1);

        let failed = JobStore::new()
            .load_job_result(&table.rows[2].result_path())
            .unwrap();
        assert!(matches!(
            failed.result.error(),
            Some(RowExecutionError::Panicked { .. })
        ));
    }

    #[test]
    fn test_each_row_runs_exactly_once_across_workers() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 24);
        let seen = Mutex::new(HashMap::<u64, usize>::new());
        let work = |row: &DesignRow| {
            // Uneven cost so early finishers pull extra rows.
            thread::sleep(Duration::from_millis(row.seed % 4 * 3));
            *seen.lock().unwrap().entry(row.seed).or_default() += 1;
            echo(row)
        };

        let summary = dispatcher(4).run(&table, &work).unwrap();
        assert_eq!(summary.executed, 24);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 24);
        assert!(seen.values().all(|&count| count == 1));
    }

    #[test]
    fn test_pool_never_exceeds_pending_rows() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 2);
        let summary = dispatcher(16).run(&table, &echo).unwrap();
        assert_eq!(summary.workers, 2);
    }

    #[test]
    fn test_staggered_start_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 6);
        let config = DispatchConfig::new(3).with_stagger(Duration::from_millis(2));
        let summary = WorkDispatcher::new(config)
            .unwrap()
            .run(&table, &echo)
            .unwrap();
        assert_eq!(summary.succeeded, 6);
    }

    #[test]
    fn test_custom_resolver_redirects_records() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 3);
        let elsewhere = dir.path().join("elsewhere");
        let resolver = |row: &DesignRow| elsewhere.join(&row.output_file);

        dispatcher(2)
            .run_with_resolver(&table, &echo, &resolver)
            .unwrap();
        let written = JobStore::new().list_completed(&elsewhere).unwrap();
        assert_eq!(written.len(), 3);
        assert!(JobStore::new().list_completed(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_targets_are_rejected_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 3);
        let target = dir.path().join("same.json");
        let resolver = |_: &DesignRow| target.clone();

        let err = dispatcher(2)
            .run_with_resolver(&table, &echo, &resolver)
            .unwrap_err();
        assert!(matches!(
            err,
            McError::Encoding(EncodingError::FilenameCollision { .. })
        ));
        assert!(!target.exists());
    }

    #[test]
    fn test_unwritable_record_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), 3);
        // A directory squatting on a record's name makes the final rename fail.
        fs::create_dir(table.rows[1].result_path()).unwrap();

        let err = dispatcher(2).run(&table, &echo).unwrap_err();
        match err {
            McError::Persistence(PersistenceError::Batch { failed, first }) => {
                assert_eq!(failed, 1);
                assert!(first.contains(&table.rows[1].output_file));
            }
            other => panic!("expected a batch persistence error, got {other:?}"),
        }
        // The other rows were still written.
        assert!(table.rows[0].result_path().is_file());
        assert!(table.rows[2].result_path().is_file());
    }

    #[test]
    fn test_dispatcher_keeps_its_configuration() {
        let config = DispatchConfig::new(5).with_stagger(Duration::from_millis(7));
        let dispatcher = WorkDispatcher::new(config.clone()).unwrap();
        assert_eq!(dispatcher.config(), &config);
        assert_eq!(dispatcher.config().pool_size, 5);
    }

    #[test]
    fn test_zero_workers_is_a_configuration_error() {
        assert!(matches!(
            WorkDispatcher::new(DispatchConfig::new(0)),
            Err(McError::Config(_))
        ));
    }
}
