//! Plain-text tabular exports. Complex payloads are
//! flattened to compact JSON strings.

use std::collections::BTreeSet;

use csv::Writer;
use mc_types::{DesignRow, DesignTable, JobOutcome, JobRecord};

/// CSV rendering of a design table, one line per job.
pub fn table_to_csv(table: &DesignTable) -> Result<Vec<u8>, csv::Error> {
    let conditions = table.condition_axes();
    let hyperparameters = table.hyperparameter_axes();

    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(table.columns())?;
    for row in table.iter() {
        let mut record = axis_cells(row, &conditions, &hyperparameters);
        record.extend(row_cells(row));
        record.push(
            row.source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        );
        writer.write_record(&record)?;
    }
    finish(writer)
}

/// CSV report of completed jobs including timing and outcome columns.
pub fn results_to_csv(records: &[JobRecord]) -> Result<Vec<u8>, csv::Error> {
    let conditions: Vec<String> = records
        .iter()
        .flat_map(|r| r.row.conditions.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let hyperparameters: Vec<String> = records
        .iter()
        .flat_map(|r| r.row.hyperparameters.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut header: Vec<String> = conditions.iter().chain(&hyperparameters).cloned().collect();
    header.extend(
        [
            "replicate",
            "seed",
            "output_path",
            "output_file",
            "start_time",
            "end_time",
            "elapsed_ms",
            "worker",
            "status",
            "result",
        ]
        .iter()
        .map(|c| c.to_string()),
    );

    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(&header)?;
    for rec in records {
        let mut record = axis_cells(&rec.row, &conditions, &hyperparameters);
        record.extend(row_cells(&rec.row));
        record.push(rec.start_time.to_rfc3339());
        record.push(rec.end_time.to_rfc3339());
        record.push(rec.elapsed_ms.to_string());
        record.push(rec.worker.to_string());
        record.push(rec.result.status().to_string());
        record.push(match &rec.result {
            JobOutcome::Success { payload } => payload.to_string(),
            JobOutcome::Failed { error } => error.to_string(),
        });
        writer.write_record(&record)?;
    }
    finish(writer)
}

fn axis_cells(row: &DesignRow, conditions: &[String], hyperparameters: &[String]) -> Vec<String> {
    let conditions = conditions.iter().map(|c| row.conditions.get(c));
    let hyperparameters = hyperparameters.iter().map(|h| row.hyperparameters.get(h));
    conditions
        .chain(hyperparameters)
        .map(|v| v.map(ToString::to_string).unwrap_or_default())
        .collect()
}

fn row_cells(row: &DesignRow) -> Vec<String> {
    vec![
        row.replicate.to_string(),
        row.seed.to_string(),
        row.output_path.display().to_string(),
        row.output_file.clone(),
    ]
}

fn finish(writer: Writer<Vec<u8>>) -> Result<Vec<u8>, csv::Error> {
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
