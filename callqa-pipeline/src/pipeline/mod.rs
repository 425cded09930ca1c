//! Pipeline scheduling and worker pool machinery

pub mod errfmt;
pub mod pool;
pub mod scheduler;

pub use pool::{JobError, JobOutcome, RetryPolicy, WorkerPool};
pub use scheduler::{PipelineScheduler, SchedulerConfig, TickSummary};
