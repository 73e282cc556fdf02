//! # mc-dispatch
//!
//! Runs every row of a design table through a caller-supplied work unit on a
//! bounded pool of worker threads. Rows with a result file already on disk
//! are skipped, so re-running an interrupted batch only does what is left.

mod dispatcher;
mod work;

pub use dispatcher::{DispatchConfig, DispatchSummary, PendingJob, PersistenceFailure, WorkDispatcher};
pub use work::{OutputResolver, TableResolver, WorkUnit};
