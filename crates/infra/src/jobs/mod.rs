//! Retarget job pipeline.
//!
//! ## Components
//!
//! - `JobRecord`: one request, its state machine and attempt history
//! - `JobRepository`: per-entry guarded records, leases and caller quotas
//! - `JobQueue`: priority lanes with retry backoff
//! - `JobScheduler`: the worker pool, timeouts and retries
//! - `RetargetProcessor`: fetch, map, bake and store for one attempt
//! - `Janitor`: lease reclamation, record retention and output sweeping

pub mod janitor;
pub mod processor;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod types;

pub use janitor::{Janitor, JanitorConfig, JanitorReport, WorkerHandle};
pub use processor::{
    Interrupted, JobContext, JobProcessor, OutputDocument, ProcessError, RetargetProcessor,
};
pub use queue::{JobQueue, Pop};
pub use repository::{CancelOutcome, JobRepository, LeaseToken, RepositoryError, Settlement};
pub use scheduler::{JobScheduler, SchedulerConfig, SchedulerError, SchedulerStats};
pub use types::{
    ErrorInfo, ErrorKind, JobRecord, JobSources, JobState, Priority, RetryPolicy,
};
