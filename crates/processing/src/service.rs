use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use animforge_core::{AssetId, CallerId, JobId};
use animforge_infra::artifacts::{ArtifactError, ArtifactStore};
use animforge_infra::catalog::{AnimationAsset, AssetCatalog, CharacterAsset};
use animforge_infra::config::PipelineConfig;
use animforge_infra::jobs::{
    Janitor, JanitorConfig, JobRecord, JobRepository, JobScheduler, JobSources, JobState,
    Priority, RetargetProcessor, SchedulerConfig, SchedulerError, WorkerHandle,
};
use animforge_retarget::{RetargetEngine, RetargetSettings};

use crate::error::ProcessingError;
use crate::view::{ArtifactLocator, JobStatus};

/// Entry point for collaborators: submit, poll, download, cancel.
#[derive(Clone)]
pub struct ProcessingService {
    catalog: Arc<dyn AssetCatalog>,
    store: Arc<dyn ArtifactStore>,
    scheduler: JobScheduler,
    /// How long a completed job's output stays downloadable.
    retention: Duration,
}

impl ProcessingService {
    pub fn new(
        catalog: Arc<dyn AssetCatalog>,
        store: Arc<dyn ArtifactStore>,
        scheduler: JobScheduler,
        retention: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            scheduler,
            retention,
        }
    }

    /// Start the default retarget pipeline described by `config`.
    pub fn start(
        config: &PipelineConfig,
        catalog: Arc<dyn AssetCatalog>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self, ProcessingError> {
        let engine = RetargetEngine::new().with_tolerance(config.skeleton_tolerance);
        let processor =
            RetargetProcessor::new(store.clone(), engine).with_output_cache(config.output_cache);
        let scheduler = JobScheduler::start(
            Arc::new(JobRepository::new(config.caller_quota)),
            store.clone(),
            Arc::new(processor),
            SchedulerConfig::from_pipeline(config),
        )
        .map_err(|e| ProcessingError::Unavailable(e.to_string()))?;

        Ok(Self::new(catalog, store, scheduler, config.job_retention()))
    }

    /// Run housekeeping for this service's pipeline in the background.
    pub fn spawn_janitor(&self, config: JanitorConfig) -> std::io::Result<WorkerHandle> {
        Janitor::new(self.scheduler.clone(), self.store.clone(), config).spawn()
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn submit(
        &self,
        character: &str,
        animation: &str,
        settings: RetargetSettings,
        caller: &CallerId,
    ) -> Result<JobId, ProcessingError> {
        self.submit_with_priority(character, animation, settings, Priority::Normal, caller)
    }

    /// Validate a request and queue a job for it.
    pub fn submit_with_priority(
        &self,
        character: &str,
        animation: &str,
        settings: RetargetSettings,
        priority: Priority,
        caller: &CallerId,
    ) -> Result<JobId, ProcessingError> {
        let character = self.resolve_character(character, caller)?;
        let animation = self.resolve_animation(animation, caller)?;
        settings
            .validate()
            .map_err(|e| ProcessingError::InvalidSettings(e.to_string()))?;

        if !self.store.contains(&character.mesh_ref) {
            return Err(ProcessingError::AssetMissing(format!(
                "mesh {} of character {}",
                character.mesh_ref, character.id
            )));
        }
        if !self.store.contains(&animation.clip_ref) {
            return Err(ProcessingError::AssetMissing(format!(
                "clip {} of animation {}",
                animation.clip_ref, animation.id
            )));
        }

        let record = JobRecord::new(
            caller.clone(),
            character.id,
            animation.id,
            settings,
            JobSources {
                mesh: character.mesh_ref,
                clip: animation.clip_ref,
                skeleton: character.skeleton,
            },
        )
        .with_priority(priority);
        let (character_id, animation_id) = (record.character.clone(), record.animation.clone());

        let job_id = self.scheduler.submit(record).map_err(|err| match err {
            SchedulerError::RateLimited { limit } => ProcessingError::RateLimited { limit },
            SchedulerError::Artifact(e) => ProcessingError::AssetMissing(e.to_string()),
            other => ProcessingError::Unavailable(other.to_string()),
        })?;

        info!(
            job_id = %job_id,
            caller = %caller,
            character = %character_id,
            animation = %animation_id,
            ?priority,
            "job submitted"
        );
        Ok(job_id)
    }

    fn resolve_character(&self, raw: &str, caller: &CallerId) -> Result<CharacterAsset, ProcessingError> {
        AssetId::parse(raw)
            .ok()
            .and_then(|id| self.catalog.character(&id))
            .filter(|asset| asset.visible_to(caller))
            .ok_or_else(|| ProcessingError::InvalidReference(format!("character {raw:?}")))
    }

    fn resolve_animation(&self, raw: &str, caller: &CallerId) -> Result<AnimationAsset, ProcessingError> {
        AssetId::parse(raw)
            .ok()
            .and_then(|id| self.catalog.animation(&id))
            .filter(|asset| asset.visible_to(caller))
            .ok_or_else(|| ProcessingError::InvalidReference(format!("animation {raw:?}")))
    }

    /// The record of `job_id`, provided `caller` owns it.
    fn owned(&self, job_id: JobId, caller: &CallerId) -> Result<JobRecord, ProcessingError> {
        match self.scheduler.get(job_id) {
            Ok(record) if &record.caller == caller => Ok(record),
            Ok(_) | Err(SchedulerError::NotFound(_)) => Err(ProcessingError::NotFound(job_id)),
            Err(other) => Err(ProcessingError::Unavailable(other.to_string())),
        }
    }

    pub fn status(&self, job_id: JobId, caller: &CallerId) -> Result<JobStatus, ProcessingError> {
        self.owned(job_id, caller).map(|record| JobStatus::from(&record))
    }

    /// Locate the output of a completed job. Has no side effects.
    pub fn fetch_result(
        &self,
        job_id: JobId,
        caller: &CallerId,
    ) -> Result<ArtifactLocator, ProcessingError> {
        let record = self.owned(job_id, caller)?;
        let output = match (&record.state, &record.output) {
            (JobState::Completed, Some(output)) => output.clone(),
            _ => {
                return Err(ProcessingError::NotReady {
                    job_id,
                    state: record.reported_state(),
                });
            }
        };

        let completed_at = record.completed_at.unwrap_or(record.created_at);
        let expires_at = expiry(completed_at, self.retention);
        if Utc::now() >= expires_at {
            return Err(ProcessingError::Gone(job_id));
        }

        let meta = self.store.meta(&output).map_err(|err| match err {
            ArtifactError::NotFound(_) => ProcessingError::Gone(job_id),
            other => ProcessingError::Unavailable(other.to_string()),
        })?;

        Ok(ArtifactLocator {
            job_id,
            content_hash: output.to_string(),
            reference: output,
            size: meta.size,
            filename: ArtifactLocator::filename_for(job_id),
            content_type: ArtifactLocator::CONTENT_TYPE,
            expires_at,
        })
    }

    /// Bytes of a completed job's output.
    pub fn open_result(&self, job_id: JobId, caller: &CallerId) -> Result<Vec<u8>, ProcessingError> {
        let locator = self.fetch_result(job_id, caller)?;
        self.store.get(&locator.reference).map_err(|err| match err {
            ArtifactError::NotFound(_) => ProcessingError::Gone(job_id),
            other => ProcessingError::Unavailable(other.to_string()),
        })
    }

    /// Cancel a job: queued jobs stop immediately, running ones at their next
    /// checkpoint, finished ones are left alone.
    pub fn cancel(&self, job_id: JobId, caller: &CallerId) -> Result<JobStatus, ProcessingError> {
        self.owned(job_id, caller)?;
        let record = self.scheduler.cancel(job_id).map_err(|err| match err {
            SchedulerError::NotFound(id) => ProcessingError::NotFound(id),
            other => ProcessingError::Unavailable(other.to_string()),
        })?;
        debug!(job_id = %job_id, caller = %caller, state = %record.state, "cancel handled");
        Ok(JobStatus::from(&record))
    }

    /// The caller's jobs, newest first.
    pub fn list_jobs(&self, caller: &CallerId) -> Vec<JobStatus> {
        self.scheduler
            .repository()
            .list_for(caller)
            .iter()
            .map(JobStatus::from)
            .collect()
    }
}

fn expiry(completed_at: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|d| completed_at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
