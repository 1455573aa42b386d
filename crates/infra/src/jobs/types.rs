//! Core job types: record, state machine and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use animforge_core::{AssetId, CallerId, DomainError, DomainResult, JobId};
use animforge_retarget::{RetargetError, RetargetSettings, Skeleton};

use crate::artifacts::ArtifactRef;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling class. Higher classes are always dequeued first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Crash or infrastructure failure during processing.
    WorkerFault,
    /// An attempt exceeded the wall-clock limit.
    Timeout,
    UnsupportedSkeleton,
    /// Source mesh or clip could not be decoded.
    MalformedSource,
    InvalidSettings,
    /// A source artifact disappeared after submission.
    SourceMissing,
}

impl ErrorKind {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::WorkerFault | ErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::WorkerFault => "worker_fault",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnsupportedSkeleton => "unsupported_skeleton",
            ErrorKind::MalformedSource => "malformed_source",
            ErrorKind::InvalidSettings => "invalid_settings",
            ErrorKind::SourceMissing => "source_missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn worker_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkerFault, message)
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("attempt exceeded {} ms", limit.as_millis()),
        )
    }
}

impl core::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl From<RetargetError> for ErrorInfo {
    fn from(err: RetargetError) -> Self {
        let kind = match err {
            RetargetError::UnsupportedSkeleton { .. } => ErrorKind::UnsupportedSkeleton,
            RetargetError::MalformedSkeleton(_) | RetargetError::MalformedClip(_) => {
                ErrorKind::MalformedSource
            }
            RetargetError::InvalidSettings(_) => ErrorKind::InvalidSettings,
        };
        Self::new(kind, err.to_string())
    }
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retries).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows `attempt` (1-indexed):
    /// `base * 2^(attempt-1)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts()
    }
}

/// Source material resolved at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSources {
    pub mesh: ArtifactRef,
    pub clip: ArtifactRef,
    /// Snapshot of the character's skeleton descriptor.
    pub skeleton: Skeleton,
}

impl JobSources {
    pub fn refs(&self) -> [&ArtifactRef; 2] {
        [&self.mesh, &self.clip]
    }
}

/// A processing job.
///
/// Invariants: `output` is set iff `state == Completed`; `error` is set iff
/// `state == Failed`; terminal records never change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub caller: CallerId,
    pub character: AssetId,
    pub animation: AssetId,
    pub settings: RetargetSettings,
    pub priority: Priority,
    pub sources: JobSources,
    pub state: JobState,
    /// High-water mark in `[0, 1]`; never decreases, even across retries.
    pub progress: f32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<ErrorInfo>,
    /// Most recent failure, including ones that were retried.
    pub last_error: Option<ErrorInfo>,
    pub output: Option<ArtifactRef>,
    pub attempt_count: u32,
    pub cancel_requested: bool,
    pub retry_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(
        caller: CallerId,
        character: AssetId,
        animation: AssetId,
        settings: RetargetSettings,
        sources: JobSources,
    ) -> Self {
        Self {
            id: JobId::new(),
            caller,
            character,
            animation,
            settings,
            priority: Priority::Normal,
            sources,
            state: JobState::Queued,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            last_error: None,
            output: None,
            attempt_count: 0,
            cancel_requested: false,
            retry_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// State as seen by pollers. A job waiting for a retry has already been
    /// observed running, so it keeps reporting `running`.
    pub fn reported_state(&self) -> JobState {
        match self.state {
            JobState::Queued if self.attempt_count > 0 => JobState::Running,
            state => state,
        }
    }

    fn expect_state(&self, expected: &[JobState], action: &'static str) -> DomainResult<()> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.id, action, self.state))
        }
    }

    /// Queued → Running; begins a new attempt.
    pub fn start(&mut self) -> DomainResult<()> {
        self.expect_state(&[JobState::Queued], "start")?;
        self.state = JobState::Running;
        self.attempt_count += 1;
        self.started_at.get_or_insert_with(Utc::now);
        self.retry_at = None;
        Ok(())
    }

    pub fn record_progress(&mut self, progress: f32) {
        if self.state == JobState::Running && progress.is_finite() {
            self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        }
    }

    /// Running → Queued, the bounded retry transition.
    pub fn requeue(&mut self, error: ErrorInfo, retry_at: DateTime<Utc>) -> DomainResult<()> {
        self.expect_state(&[JobState::Running], "requeue")?;
        self.state = JobState::Queued;
        self.last_error = Some(error);
        self.retry_at = Some(retry_at);
        Ok(())
    }

    pub fn complete(&mut self, output: ArtifactRef) -> DomainResult<()> {
        self.expect_state(&[JobState::Running], "complete")?;
        self.state = JobState::Completed;
        self.progress = 1.0;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: ErrorInfo) -> DomainResult<()> {
        self.expect_state(&[JobState::Running], "fail")?;
        self.state = JobState::Failed;
        self.last_error = Some(error.clone());
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Queued → Cancelled directly, or Running → Cancelled once the worker
    /// observes the request.
    pub fn cancel(&mut self) -> DomainResult<()> {
        self.expect_state(&[JobState::Queued, JobState::Running], "cancel")?;
        self.state = JobState::Cancelled;
        self.cancel_requested = true;
        self.retry_at = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn request_cancel(&mut self) {
        if !self.is_terminal() {
            self.cancel_requested = true;
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use animforge_retarget::presets;

    pub fn sources() -> JobSources {
        JobSources {
            mesh: ArtifactRef::of(b"mesh"),
            clip: ArtifactRef::of(b"clip"),
            skeleton: presets::humanoid_rig("mixamorig:", 1.0),
        }
    }

    pub fn record(caller: &str) -> JobRecord {
        JobRecord::new(
            CallerId::parse(caller).unwrap(),
            AssetId::parse("Kaya").unwrap(),
            AssetId::parse("Walking").unwrap(),
            RetargetSettings::default(),
            sources(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(30));
    }

    #[test]
    fn should_retry_allows_max_retries_plus_one_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn lifecycle_to_completion() {
        let mut job = fixtures::record("alice");
        assert_eq!(job.state, JobState::Queued);

        job.start().unwrap();
        assert_eq!(job.attempt_count, 1);
        job.record_progress(0.3);
        job.record_progress(0.1);
        assert_eq!(job.progress, 0.3);

        job.complete(ArtifactRef::of(b"out")).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 1.0);
        assert!(job.output.is_some() && job.error.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn retry_keeps_reporting_running() {
        let mut job = fixtures::record("alice");
        job.start().unwrap();
        job.record_progress(0.5);
        job.requeue(ErrorInfo::worker_fault("boom"), Utc::now()).unwrap();

        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.reported_state(), JobState::Running);
        assert_eq!(job.progress, 0.5);
        assert!(job.error.is_none());
        assert_eq!(job.last_error.as_ref().unwrap().kind, ErrorKind::WorkerFault);

        job.start().unwrap();
        assert_eq!(job.attempt_count, 2);
    }

    #[test]
    fn terminal_records_reject_transitions() {
        let mut job = fixtures::record("alice");
        job.start().unwrap();
        job.fail(ErrorInfo::timeout(Duration::from_secs(1))).unwrap();
        assert!(job.error.is_some() && job.output.is_none());

        assert!(job.start().is_err());
        assert!(job.complete(ArtifactRef::of(b"late")).is_err());
        assert!(job.cancel().is_err());
        job.request_cancel();
        assert!(!job.cancel_requested);
    }

    #[test]
    fn queued_job_cancels_directly() {
        let mut job = fixtures::record("alice");
        job.cancel().unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.output.is_none() && job.error.is_none());
    }

    #[test]
    fn retarget_errors_map_to_error_kinds() {
        let info: ErrorInfo = RetargetError::MalformedClip("bad".into()).into();
        assert_eq!(info.kind, ErrorKind::MalformedSource);
        assert!(!info.kind.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
    }

    #[test]
    fn priorities_order_high_first() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
