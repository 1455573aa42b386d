//! What callers get to see of a job.

use chrono::{DateTime, Utc};
use serde::Serialize;

use animforge_core::{AssetId, JobId};
use animforge_infra::artifacts::ArtifactRef;
use animforge_infra::jobs::{ErrorInfo, JobRecord, JobState, Priority};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub character_id: AssetId,
    pub animation_id: AssetId,
    /// A job waiting out a retry backoff reports `running`.
    pub state: JobState,
    pub progress: f32,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub attempt_count: u32,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobStatus {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            character_id: record.character.clone(),
            animation_id: record.animation.clone(),
            state: record.reported_state(),
            progress: record.progress,
            priority: record.priority,
            error: record.error.clone(),
            attempt_count: record.attempt_count,
            cancel_requested: record.cancel_requested,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }
}

/// Where to download a finished job's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactLocator {
    pub job_id: JobId,
    pub reference: ArtifactRef,
    /// SHA-256 hex of the bytes; equal to `reference`.
    pub content_hash: String,
    pub size: u64,
    pub filename: String,
    pub content_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

impl ArtifactLocator {
    pub const CONTENT_TYPE: &'static str = "application/json";

    pub fn filename_for(job_id: JobId) -> String {
        format!("character_animated_{job_id}.json")
    }
}
