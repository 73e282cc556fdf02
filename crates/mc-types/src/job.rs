use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::design::DesignRow;
use crate::errors::RowExecutionError;

/// What a work unit produced for one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success { payload: serde_json::Value },
    Failed { error: RowExecutionError },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success { payload } => Some(payload),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&RowExecutionError> {
        match self {
            Self::Success { .. } => None,
            Self::Failed { error } => Some(error),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failed { .. } => "failed",
        }
    }
}

impl From<Result<serde_json::Value, RowExecutionError>> for JobOutcome {
    fn from(result: Result<serde_json::Value, RowExecutionError>) -> Self {
        match result {
            Ok(payload) => Self::Success { payload },
            Err(error) => Self::Failed { error },
        }
    }
}

/// A design row plus the runtime fields appended while it executed.
///
/// Built once when its worker finishes and written once; records are never
/// updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(flatten)]
    pub row: DesignRow,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub worker: usize,
    pub result: JobOutcome,
}

impl JobRecord {
    pub fn new(
        row: DesignRow,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        worker: usize,
        result: JobOutcome,
    ) -> Self {
        Self {
            row,
            start_time,
            end_time,
            elapsed_ms: (end_time - start_time).num_milliseconds(),
            worker,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::AxisValue;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn row() -> DesignRow {
        let mut conditions = BTreeMap::new();
        conditions.insert("N".to_string(), AxisValue::from(100));
        DesignRow {
            conditions,
            hyperparameters: BTreeMap::new(),
            replicate: 1,
            seed: 1107,
            output_path: PathBuf::from("out"),
            output_file: "sim_N-100_1107.json".to_string(),
            source: None,
        }
    }

    #[test]
    fn test_elapsed_is_derived_from_timestamps() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(1500);
        let record = JobRecord::new(
            row(),
            start,
            end,
            0,
            JobOutcome::Success {
                payload: serde_json::json!({"rows": 3}),
            },
        );
        assert_eq!(record.elapsed_ms, 1500);
        assert!(record.result.is_success());
    }

    #[test]
    fn test_failed_record_round_trip() {
        let start = Utc::now();
        let record = JobRecord::new(
            row(),
            start,
            start,
            3,
            Err(RowExecutionError::failed("sampler diverged")).into(),
        );

        let json = serde_json::to_string(&record).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
        assert_eq!(back.result.status(), "failed");
        assert_eq!(
            back.result.error(),
            Some(&RowExecutionError::failed("sampler diverged"))
        );
    }
}
