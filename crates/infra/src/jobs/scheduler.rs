//! Fixed-size worker pool driving jobs through their lifecycle.
//!
//! Each worker pops a job, takes its lease and runs the processor on a
//! dedicated bake thread. The worker waits for that thread no longer than the
//! lease deadline; an attempt that overruns is settled as a timeout and its
//! lease revoked, so whatever it writes afterwards is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use animforge_core::JobId;

use crate::artifacts::{ArtifactError, ArtifactRef, ArtifactStore};
use crate::config::PipelineConfig;

use super::processor::{Interrupted, JobContext, JobProcessor, ProcessError};
use super::queue::{JobQueue, Pop};
use super::repository::{CancelOutcome, JobRepository, LeaseToken, RepositoryError, Settlement};
use super::types::{ErrorInfo, JobRecord, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Wall-clock limit of one attempt.
    pub job_timeout: Duration,
    /// How long an idle worker blocks on the queue before rechecking shutdown.
    pub poll_interval: Duration,
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
            job_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(100),
            name: "retarget".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers,
            retry: config.retry_policy(),
            job_timeout: config.job_timeout(),
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub peak_running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    pub timed_out: u64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("caller already has {limit} active jobs")]
    RateLimited { limit: usize },
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("source artifact unavailable: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("scheduler is shutting down")]
    ShuttingDown,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for SchedulerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::RateLimited { limit, .. } => SchedulerError::RateLimited { limit },
            RepositoryError::NotFound(id) => SchedulerError::NotFound(id),
            other => SchedulerError::Repository(other),
        }
    }
}

struct Shared {
    repo: Arc<JobRepository>,
    queue: JobQueue,
    store: Arc<dyn ArtifactStore>,
    processor: Arc<dyn JobProcessor>,
    config: SchedulerConfig,
    stats: Mutex<SchedulerStats>,
    shutting_down: AtomicBool,
}

/// Handle to a running worker pool. Clones share the same pool.
#[derive(Clone)]
pub struct JobScheduler {
    shared: Arc<Shared>,
    workers: Arc<Mutex<Vec<thread::JoinHandle<()>>>>,
}

impl core::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl JobScheduler {
    /// Spawn `config.workers` worker threads.
    pub fn start(
        repo: Arc<JobRepository>,
        store: Arc<dyn ArtifactStore>,
        processor: Arc<dyn JobProcessor>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let shared = Arc::new(Shared {
            repo,
            queue: JobQueue::new(),
            store,
            processor,
            config,
            stats: Mutex::new(SchedulerStats::default()),
            shutting_down: AtomicBool::new(false),
        });
        let scheduler = Self {
            shared: shared.clone(),
            workers: Arc::new(Mutex::new(Vec::new())),
        };

        for index in 0..shared.config.workers.max(1) {
            let name = format!("{}-worker-{index}", shared.config.name);
            let worker = shared.clone();
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(worker, name));
            match spawned {
                Ok(join) => scheduler.workers.lock().unwrap().push(join),
                Err(err) => {
                    scheduler.shutdown();
                    return Err(SchedulerError::Spawn(err.to_string()));
                }
            }
        }

        info!(
            scheduler = %shared.config.name,
            workers = shared.config.workers,
            timeout_ms = shared.config.job_timeout.as_millis() as u64,
            "job scheduler started"
        );
        Ok(scheduler)
    }

    pub fn repository(&self) -> &Arc<JobRepository> {
        &self.shared.repo
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Pin the job's sources, record it and enqueue it.
    pub fn submit(&self, record: JobRecord) -> Result<JobId, SchedulerError> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        let sources: Vec<ArtifactRef> = record.sources.refs().into_iter().cloned().collect();
        for (pinned, reference) in sources.iter().enumerate() {
            if let Err(err) = self.shared.store.pin(reference) {
                unpin_all(self.shared.store.as_ref(), &sources[..pinned]);
                return Err(err.into());
            }
        }

        let (id, priority) = (record.id, record.priority);
        if let Err(err) = self.shared.repo.insert(record) {
            unpin_all(self.shared.store.as_ref(), &sources);
            return Err(err.into());
        }

        if !self.shared.queue.push(id, priority, Instant::now()) {
            if let Ok(CancelOutcome::Cancelled(_)) = self.shared.repo.cancel(id) {
                unpin_all(self.shared.store.as_ref(), &sources);
            }
            return Err(SchedulerError::ShuttingDown);
        }

        debug!(job_id = %id, ?priority, "job queued");
        Ok(id)
    }

    pub fn get(&self, id: JobId) -> Result<JobRecord, SchedulerError> {
        Ok(self.shared.repo.get(id)?)
    }

    /// Cancel a queued job immediately, or flag a running one.
    pub fn cancel(&self, id: JobId) -> Result<JobRecord, SchedulerError> {
        let outcome = self.shared.repo.cancel(id)?;
        match &outcome {
            CancelOutcome::Cancelled(record) => {
                self.shared.queue.remove(id);
                self.shared.release_sources(record);
                self.shared.stats.lock().unwrap().cancelled += 1;
                info!(job_id = %id, "queued job cancelled");
            }
            CancelOutcome::Requested(_) => info!(job_id = %id, "cancellation requested"),
            CancelOutcome::Unchanged(record) => {
                debug!(job_id = %id, state = %record.state, "cancel on terminal job ignored")
            }
        }
        Ok(outcome.record().clone())
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.shared.stats.lock().unwrap().clone();
        stats.queued = self.shared.queue.len();
        stats
    }

    /// Settle attempts whose lease deadline passed without the worker
    /// reporting back. Returns how many were reclaimed.
    pub fn reclaim_expired_leases(&self) -> usize {
        self.shared.reclaim_expired()
    }

    /// Drop terminal records finished at or before `cutoff` and release their
    /// outputs for sweeping.
    pub fn purge_finished(&self, cutoff: DateTime<Utc>) -> Vec<JobRecord> {
        let purged = self.shared.repo.purge_terminal(cutoff);
        for record in &purged {
            if let Some(output) = &record.output {
                if let Err(err) = self.shared.store.unpin(output) {
                    warn!(job_id = %record.id, output = %output, error = %err, "failed to unpin output");
                }
            }
        }
        purged
    }

    /// Stop taking work and wait for the workers to finish their current
    /// attempts. Jobs still queued stay queued.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.queue.close();
        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for join in workers {
            let _ = join.join();
        }
        info!(scheduler = %self.shared.config.name, "job scheduler stopped");
    }
}

fn unpin_all(store: &dyn ArtifactStore, refs: &[ArtifactRef]) {
    for reference in refs {
        if let Err(err) = store.unpin(reference) {
            warn!(artifact = %reference, error = %err, "failed to unpin artifact");
        }
    }
}

impl Shared {
    fn release_sources(&self, record: &JobRecord) {
        let refs: Vec<ArtifactRef> = record.sources.refs().into_iter().cloned().collect();
        unpin_all(self.store.as_ref(), &refs);
    }

    fn apply_settlement(&self, settlement: Settlement) {
        match settlement {
            Settlement::Retry { record, delay } => {
                self.stats.lock().unwrap().retried += 1;
                info!(
                    job_id = %record.id,
                    attempt = record.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = ?record.last_error,
                    "retrying job"
                );
                if !self.queue.push(record.id, record.priority, Instant::now() + delay) {
                    warn!(job_id = %record.id, "queue closed; retry not scheduled");
                }
            }
            Settlement::Failed(record) => {
                self.stats.lock().unwrap().failed += 1;
                warn!(
                    job_id = %record.id,
                    attempt = record.attempt_count,
                    error = ?record.error,
                    "job failed"
                );
                self.release_sources(&record);
            }
            Settlement::Cancelled(record) => {
                self.stats.lock().unwrap().cancelled += 1;
                info!(job_id = %record.id, "job cancelled");
                self.release_sources(&record);
            }
        }
    }

    /// Returns whether this call settled the attempt.
    fn settle(&self, token: &LeaseToken, error: ErrorInfo) -> bool {
        match self.repo.settle_failure(token, error, &self.config.retry) {
            Ok(settlement) => {
                self.apply_settlement(settlement);
                true
            }
            Err(RepositoryError::LeaseLost(id)) => {
                debug!(job_id = %id, "attempt already settled elsewhere");
                false
            }
            Err(err) => {
                error!(job_id = %token.job_id, error = %err, "failed to settle attempt");
                false
            }
        }
    }

    /// Settle an attempt that overran its deadline. Counted only if the
    /// lease was still ours; the janitor may have reclaimed it first.
    fn time_out(&self, token: &LeaseToken) {
        if self.settle(token, ErrorInfo::timeout(self.config.job_timeout)) {
            self.stats.lock().unwrap().timed_out += 1;
        }
    }

    fn reclaim_expired(&self) -> usize {
        let settled =
            self.repo
                .reclaim_expired(Instant::now(), &self.config.retry, self.config.job_timeout);
        let count = settled.len();
        self.stats.lock().unwrap().timed_out += count as u64;
        for settlement in settled {
            self.apply_settlement(settlement);
        }
        count
    }

    fn complete(&self, token: &LeaseToken, output: ArtifactRef) {
        if let Err(err) = self.store.pin(&output) {
            self.settle(token, ErrorInfo::worker_fault(format!("output vanished: {err}")));
            return;
        }
        match self.repo.complete(token, output.clone()) {
            Ok(record) => {
                self.stats.lock().unwrap().completed += 1;
                info!(
                    job_id = %record.id,
                    attempt = record.attempt_count,
                    output = %output,
                    "job completed"
                );
                self.release_sources(&record);
            }
            Err(err) => {
                debug!(job_id = %token.job_id, error = %err, "discarding late output");
                unpin_all(self.store.as_ref(), std::slice::from_ref(&output));
            }
        }
    }

    fn cancelled(&self, token: &LeaseToken) {
        match self.repo.cancel_running(token) {
            Ok(record) => self.apply_settlement(Settlement::Cancelled(record)),
            Err(err) => debug!(job_id = %token.job_id, error = %err, "cancel after lease loss"),
        }
    }
}

fn worker_loop(shared: Arc<Shared>, name: String) {
    debug!(worker = %name, "worker started");
    loop {
        match shared.queue.pop(shared.config.poll_interval) {
            Pop::Job(id) => run_attempt(&shared, &name, id),
            Pop::Idle => {
                if shared.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
            }
            Pop::Closed => break,
        }
    }
    debug!(worker = %name, "worker stopped");
}

fn run_attempt(shared: &Arc<Shared>, worker: &str, id: JobId) {
    let (token, record) = match shared.repo.acquire_lease(id, worker, shared.config.job_timeout) {
        Ok(leased) => leased,
        Err(err) => {
            // Cancelled or purged between dequeue and lease.
            debug!(worker, job_id = %id, error = %err, "skipping job");
            return;
        }
    };

    {
        let mut stats = shared.stats.lock().unwrap();
        stats.running += 1;
        stats.peak_running = stats.peak_running.max(stats.running);
    }
    debug!(worker, job_id = %id, attempt = token.attempt, "attempt started");

    let (tx, rx) = mpsc::channel();
    let processor = shared.processor.clone();
    let ctx = JobContext::new(shared.repo.clone(), token.clone());
    let spawned = thread::Builder::new()
        .name(format!("{worker}-bake"))
        .spawn(move || {
            let _ = tx.send(processor.process(&record, &ctx));
        });

    match spawned {
        Err(err) => {
            shared.settle(&token, ErrorInfo::worker_fault(format!("spawn failed: {err}")));
        }
        Ok(bake) => {
            let wait = token.expires_at.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok(Ok(output)) => shared.complete(&token, output),
                Ok(Err(ProcessError::Failed(error))) => {
                    shared.settle(&token, error);
                }
                Ok(Err(ProcessError::Interrupted(Interrupted::Cancelled))) => shared.cancelled(&token),
                Ok(Err(ProcessError::Interrupted(Interrupted::LeaseLost))) => {
                    debug!(worker, job_id = %id, "attempt lost its lease")
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(worker, job_id = %id, attempt = token.attempt, "attempt timed out");
                    shared.time_out(&token);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!(worker, job_id = %id, attempt = token.attempt, "processing thread panicked");
                    shared.settle(&token, ErrorInfo::worker_fault("processing thread panicked"));
                }
            }

            // The job is already settled, but the worker slot stays taken
            // until the bake thread is gone; otherwise overrunning bakes pile
            // up beyond the pool size.
            if !bake.is_finished() {
                debug!(worker, job_id = %id, "waiting for abandoned bake to stop");
            }
            if bake.join().is_err() {
                debug!(worker, job_id = %id, "bake thread panicked");
            }
        }
    }

    let mut stats = shared.stats.lock().unwrap();
    stats.running = stats.running.saturating_sub(1);
}
