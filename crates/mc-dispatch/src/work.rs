use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use mc_types::{DesignRow, RowExecutionError};

/// The opaque job executed once per row.
///
/// Implementations are shared by every worker of the pool, hence `Sync`.
pub trait WorkUnit: Sync {
    fn execute(&self, row: &DesignRow) -> Result<serde_json::Value, RowExecutionError>;
}

impl<F> WorkUnit for F
where
    F: Fn(&DesignRow) -> Result<serde_json::Value, RowExecutionError> + Sync,
{
    fn execute(&self, row: &DesignRow) -> Result<serde_json::Value, RowExecutionError> {
        self(row)
    }
}

/// Decides where a row's job record is written.
pub trait OutputResolver: Sync {
    fn resolve(&self, row: &DesignRow) -> PathBuf;
}

impl<F> OutputResolver for F
where
    F: Fn(&DesignRow) -> PathBuf + Sync,
{
    fn resolve(&self, row: &DesignRow) -> PathBuf {
        self(row)
    }
}

/// `output_path/output_file`, exactly as the table names it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableResolver;

impl OutputResolver for TableResolver {
    fn resolve(&self, row: &DesignRow) -> PathBuf {
        row.result_path()
    }
}

/// Run `work` on `row`, turning a panic into a row error so the worker
/// survives to pick up the next row.
pub(crate) fn execute_guarded<W: WorkUnit + ?Sized>(
    work: &W,
    row: &DesignRow,
) -> Result<serde_json::Value, RowExecutionError> {
    match panic::catch_unwind(AssertUnwindSafe(|| work.execute(row))) {
        Ok(result) => result,
        Err(payload) => Err(RowExecutionError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
