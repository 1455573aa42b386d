//! Job records as an arena of individually guarded entries.
//!
//! The index lock is held only to find or insert an entry; every read or
//! write of a record happens under that record's own mutex, so unrelated jobs
//! never contend. A running job is written only by the holder of its current
//! lease; revoking a lease bumps its generation and fences off late writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use animforge_core::{CallerId, DomainError, JobId};

use super::types::{ErrorInfo, JobRecord, JobState, RetryPolicy};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepositoryError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("caller {caller} already has {limit} active jobs")]
    RateLimited { caller: CallerId, limit: usize },
    #[error("lease on job {0} is no longer held")]
    LeaseLost(JobId),
    #[error(transparent)]
    Transition(#[from] DomainError),
}

#[derive(Debug, Clone)]
struct Lease {
    worker: String,
    generation: u64,
    expires_at: Instant,
}

#[derive(Debug)]
struct EntryState {
    record: JobRecord,
    lease: Option<Lease>,
    generation: u64,
}

#[derive(Debug)]
struct JobEntry {
    state: Mutex<EntryState>,
}

/// Proof of ownership of a running attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    pub job_id: JobId,
    pub generation: u64,
    pub attempt: u32,
    pub expires_at: Instant,
}

/// How a failed attempt was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Back in the queue after `delay`.
    Retry { record: JobRecord, delay: Duration },
    Failed(JobRecord),
    /// Cancellation had been requested, so no retry was scheduled.
    Cancelled(JobRecord),
}

impl Settlement {
    pub fn record(&self) -> &JobRecord {
        match self {
            Settlement::Retry { record, .. } => record,
            Settlement::Failed(record) | Settlement::Cancelled(record) => record,
        }
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The job was queued and is now cancelled.
    Cancelled(JobRecord),
    /// The job is running; the worker will see the flag at its next checkpoint.
    Requested(JobRecord),
    /// Already terminal; nothing changed.
    Unchanged(JobRecord),
}

impl CancelOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            CancelOutcome::Cancelled(r) | CancelOutcome::Requested(r) | CancelOutcome::Unchanged(r) => r,
        }
    }
}

#[derive(Debug)]
pub struct JobRepository {
    entries: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    active: Mutex<HashMap<CallerId, usize>>,
    caller_quota: usize,
}

impl JobRepository {
    pub fn new(caller_quota: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            caller_quota,
        }
    }

    pub fn caller_quota(&self) -> usize {
        self.caller_quota
    }

    fn entry(&self, id: JobId) -> Result<Arc<JobEntry>, RepositoryError> {
        self.entries
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    /// Insert a new queued record, reserving one of the caller's active-job
    /// slots. Fails with `RateLimited` when the quota is exhausted.
    pub fn insert(&self, record: JobRecord) -> Result<(), RepositoryError> {
        let id = record.id;
        let caller = record.caller.clone();

        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(caller.clone()).or_insert(0);
            if *count >= self.caller_quota {
                return Err(RepositoryError::RateLimited {
                    caller,
                    limit: self.caller_quota,
                });
            }
            *count += 1;
        }

        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&id) {
            drop(entries);
            self.release_slot(&caller);
            return Err(RepositoryError::AlreadyExists(id));
        }
        entries.insert(
            id,
            Arc::new(JobEntry {
                state: Mutex::new(EntryState {
                    record,
                    lease: None,
                    generation: 0,
                }),
            }),
        );
        Ok(())
    }

    fn release_slot(&self, caller: &CallerId) {
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(caller) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(caller);
            }
        }
    }

    /// Active (non-terminal) jobs of `caller`.
    pub fn active_count(&self, caller: &CallerId) -> usize {
        self.active.lock().unwrap().get(caller).copied().unwrap_or(0)
    }

    pub fn get(&self, id: JobId) -> Result<JobRecord, RepositoryError> {
        let entry = self.entry(id)?;
        let state = entry.state.lock().unwrap();
        Ok(state.record.clone())
    }

    /// Records owned by `caller`, newest first.
    pub fn list_for(&self, caller: &CallerId) -> Vec<JobRecord> {
        let entries: Vec<Arc<JobEntry>> = self.entries.read().unwrap().values().cloned().collect();
        let mut records: Vec<JobRecord> = entries
            .iter()
            .filter_map(|e| {
                let state = e.state.lock().unwrap();
                (&state.record.caller == caller).then(|| state.record.clone())
            })
            .collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a new attempt on a queued job and hand its lease to `worker`.
    pub fn acquire_lease(
        &self,
        id: JobId,
        worker: &str,
        ttl: Duration,
    ) -> Result<(LeaseToken, JobRecord), RepositoryError> {
        let entry = self.entry(id)?;
        let mut state = entry.state.lock().unwrap();
        state.record.start()?;
        state.generation += 1;
        let expires_at = Instant::now() + ttl;
        state.lease = Some(Lease {
            worker: worker.to_string(),
            generation: state.generation,
            expires_at,
        });
        let token = LeaseToken {
            job_id: id,
            generation: state.generation,
            attempt: state.record.attempt_count,
            expires_at,
        };
        Ok((token, state.record.clone()))
    }

    fn with_lease<T>(
        &self,
        token: &LeaseToken,
        f: impl FnOnce(&mut EntryState) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let entry = self.entry(token.job_id)?;
        let mut state = entry.state.lock().unwrap();
        match &state.lease {
            Some(lease) if lease.generation == token.generation => f(&mut state),
            _ => Err(RepositoryError::LeaseLost(token.job_id)),
        }
    }

    /// Record progress; returns whether cancellation has been requested.
    pub fn checkpoint(&self, token: &LeaseToken, progress: f32) -> Result<bool, RepositoryError> {
        self.with_lease(token, |state| {
            state.record.record_progress(progress);
            Ok(state.record.cancel_requested)
        })
    }

    /// Apply a terminal transition under the lease and release it.
    fn finish(
        &self,
        token: &LeaseToken,
        f: impl FnOnce(&mut JobRecord) -> Result<(), DomainError>,
    ) -> Result<JobRecord, RepositoryError> {
        let record = self.with_lease(token, |state| {
            f(&mut state.record)?;
            state.lease = None;
            Ok(state.record.clone())
        })?;
        if record.is_terminal() {
            self.release_slot(&record.caller);
        }
        Ok(record)
    }

    pub fn complete(
        &self,
        token: &LeaseToken,
        output: crate::artifacts::ArtifactRef,
    ) -> Result<JobRecord, RepositoryError> {
        self.finish(token, |r| r.complete(output))
    }

    /// The worker observed a cancellation request.
    pub fn cancel_running(&self, token: &LeaseToken) -> Result<JobRecord, RepositoryError> {
        self.finish(token, |r| r.cancel())
    }

    /// Settle a failed attempt: retry if the failure is transient and the
    /// policy allows, fail otherwise.
    pub fn settle_failure(
        &self,
        token: &LeaseToken,
        error: ErrorInfo,
        policy: &RetryPolicy,
    ) -> Result<Settlement, RepositoryError> {
        let mut delay = None;
        let record = self.finish(token, |r| settle(r, error, policy, &mut delay))?;
        Ok(settlement(record, delay))
    }

    /// Reclaim leases whose holders overran their deadline. Each affected
    /// attempt is settled as a timeout.
    pub fn reclaim_expired(
        &self,
        now: Instant,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> Vec<Settlement> {
        let entries: Vec<Arc<JobEntry>> = self.entries.read().unwrap().values().cloned().collect();
        let mut settled = Vec::new();

        for entry in entries {
            let mut state = entry.state.lock().unwrap();
            let expired = state.lease.as_ref().is_some_and(|l| l.expires_at <= now);
            if !expired {
                continue;
            }
            if let Some(lease) = state.lease.take() {
                warn!(
                    job_id = %state.record.id,
                    worker = %lease.worker,
                    generation = lease.generation,
                    "reclaiming expired lease"
                );
            }

            let mut delay = None;
            match settle(&mut state.record, ErrorInfo::timeout(timeout), policy, &mut delay) {
                Ok(()) => {
                    let record = state.record.clone();
                    drop(state);
                    if record.is_terminal() {
                        self.release_slot(&record.caller);
                    }
                    settled.push(settlement(record, delay));
                }
                Err(err) => warn!(error = %err, "could not settle reclaimed job"),
            }
        }
        settled
    }

    /// Cancel a queued job, or flag a running one.
    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, RepositoryError> {
        let entry = self.entry(id)?;
        let mut state = entry.state.lock().unwrap();
        let outcome = match state.record.state {
            JobState::Queued => {
                state.record.cancel()?;
                CancelOutcome::Cancelled(state.record.clone())
            }
            JobState::Running => {
                state.record.request_cancel();
                CancelOutcome::Requested(state.record.clone())
            }
            _ => CancelOutcome::Unchanged(state.record.clone()),
        };
        drop(state);

        if let CancelOutcome::Cancelled(record) = &outcome {
            self.release_slot(&record.caller);
        }
        Ok(outcome)
    }

    /// Remove terminal records that finished at or before `cutoff`.
    pub fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Vec<JobRecord> {
        let mut entries = self.entries.write().unwrap();
        let expired: Vec<JobId> = entries
            .iter()
            .filter(|(_, e)| {
                let state = e.state.lock().unwrap();
                state.record.is_terminal()
                    && state.record.completed_at.is_some_and(|at| at <= cutoff)
            })
            .map(|(id, _)| *id)
            .collect();

        let purged: Vec<JobRecord> = expired
            .iter()
            .filter_map(|id| entries.remove(id))
            .map(|e| e.state.lock().unwrap().record.clone())
            .collect();
        if !purged.is_empty() {
            debug!(count = purged.len(), "purged terminal job records");
        }
        purged
    }
}

fn settle(
    record: &mut JobRecord,
    error: ErrorInfo,
    policy: &RetryPolicy,
    delay: &mut Option<Duration>,
) -> Result<(), DomainError> {
    if record.cancel_requested {
        record.last_error = Some(error);
        return record.cancel();
    }
    if error.kind.is_retryable() && policy.should_retry(record.attempt_count) {
        let wait = policy.delay_for_attempt(record.attempt_count);
        let retry_at = Utc::now() + chrono::Duration::from_std(wait).unwrap_or_default();
        *delay = Some(wait);
        return record.requeue(error, retry_at);
    }
    record.fail(error)
}

fn settlement(record: JobRecord, delay: Option<Duration>) -> Settlement {
    match (record.state, delay) {
        (JobState::Queued, Some(delay)) => Settlement::Retry { record, delay },
        (JobState::Cancelled, _) => Settlement::Cancelled(record),
        _ => Settlement::Failed(record),
    }
}
