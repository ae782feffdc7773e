//! Collection orchestration: pagination with adaptive pacing, the daemon
//! loop with durable checkpoints, and graceful shutdown.

pub mod checkpoint;
pub mod error;
pub mod orchestrator;
pub mod paginator;
pub mod pidfile;
pub mod shutdown;
pub mod sink;

#[cfg(test)]
mod test_support;

pub use checkpoint::{CheckpointStore, DEFAULT_CHECKPOINT_FILE};
pub use error::CollectError;
pub use orchestrator::{DaemonOptions, DaemonSummary, Orchestrator, PassSummary};
pub use paginator::{PagePolicy, PaginationOutcome, Paginator, StepReport, StopReason};
pub use pidfile::{PidFile, DEFAULT_PID_FILE};
pub use shutdown::{cancel_on_signal, shutdown_signal, sleep_or_cancel};
pub use sink::{RecordSink, StorageSink};
