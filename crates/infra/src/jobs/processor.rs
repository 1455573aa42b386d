//! The work performed for one attempt of a job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use animforge_core::AssetId;
use animforge_retarget::{AnimationClip, BakedClip, RetargetEngine, RetargetError, RetargetSettings};

use crate::artifacts::{ArtifactError, ArtifactKind, ArtifactRef, ArtifactStore, sha256_hex};

use super::repository::{JobRepository, LeaseToken, RepositoryError};
use super::types::{ErrorInfo, ErrorKind, JobRecord};

/// Progress reported after each stage.
pub mod stage {
    pub const FETCHED: f32 = 0.1;
    pub const MAPPED: f32 = 0.3;
    pub const BAKED: f32 = 0.8;
    pub const STORED: f32 = 0.95;
}

/// Why an attempt stopped before producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("cancellation requested")]
    Cancelled,
    /// The attempt was timed out or reclaimed; its writes are void.
    #[error("lease lost")]
    LeaseLost,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("{0}")]
    Failed(ErrorInfo),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl From<ErrorInfo> for ProcessError {
    fn from(info: ErrorInfo) -> Self {
        ProcessError::Failed(info)
    }
}

impl From<RetargetError> for ProcessError {
    fn from(err: RetargetError) -> Self {
        ProcessError::Failed(err.into())
    }
}

/// Handle given to a processor for reporting progress under its lease.
#[derive(Debug, Clone)]
pub struct JobContext {
    repo: Arc<JobRepository>,
    token: LeaseToken,
}

impl JobContext {
    pub fn new(repo: Arc<JobRepository>, token: LeaseToken) -> Self {
        Self { repo, token }
    }

    pub fn attempt(&self) -> u32 {
        self.token.attempt
    }

    /// Record progress and observe cancellation. Fails once the job has been
    /// cancelled or the lease has been revoked.
    pub fn checkpoint(&self, progress: f32) -> Result<(), Interrupted> {
        match self.repo.checkpoint(&self.token, progress) {
            Ok(false) => Ok(()),
            Ok(true) => Err(Interrupted::Cancelled),
            Err(RepositoryError::LeaseLost(_) | RepositoryError::NotFound(_)) => {
                Err(Interrupted::LeaseLost)
            }
            Err(err) => {
                debug!(job_id = %self.token.job_id, error = %err, "checkpoint rejected");
                Err(Interrupted::LeaseLost)
            }
        }
    }
}

/// Turns a leased job into an output artifact.
pub trait JobProcessor: Send + Sync {
    fn process(&self, job: &JobRecord, ctx: &JobContext) -> Result<ArtifactRef, ProcessError>;
}

/// The baked artifact handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDocument {
    pub format: String,
    pub version: u32,
    pub character_id: AssetId,
    pub animation_id: AssetId,
    /// The character mesh the clip was baked for.
    pub mesh_hash: String,
    pub export_format: String,
    pub settings: RetargetSettings,
    pub clip: BakedClip,
}

impl OutputDocument {
    pub const FORMAT: &'static str = "animforge.baked+json";
    pub const VERSION: u32 = 1;

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Fetch, map, bake and store.
pub struct RetargetProcessor {
    store: Arc<dyn ArtifactStore>,
    engine: RetargetEngine,
    cache: Option<Mutex<HashMap<String, ArtifactRef>>>,
}

impl RetargetProcessor {
    pub fn new(store: Arc<dyn ArtifactStore>, engine: RetargetEngine) -> Self {
        Self {
            store,
            engine,
            cache: None,
        }
    }

    /// Reuse the output of an identical earlier request while it is still stored.
    pub fn with_output_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled.then(Mutex::default);
        self
    }

    fn cached(&self, key: &str) -> Option<ArtifactRef> {
        let cache = self.cache.as_ref()?;
        let hit = cache.lock().unwrap().get(key).cloned()?;
        if self.store.contains(&hit) {
            Some(hit)
        } else {
            cache.lock().unwrap().remove(key);
            None
        }
    }

    fn remember(&self, key: String, output: &ArtifactRef) {
        if let Some(cache) = &self.cache {
            cache.lock().unwrap().insert(key, output.clone());
        }
    }

    fn fetch(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ErrorInfo> {
        self.store.get(reference).map_err(source_error)
    }
}

fn source_error(err: ArtifactError) -> ErrorInfo {
    match err {
        ArtifactError::NotFound(r) => {
            ErrorInfo::new(ErrorKind::SourceMissing, format!("source artifact {r} is gone"))
        }
        other => ErrorInfo::worker_fault(format!("artifact store: {other}")),
    }
}

/// Key identifying a request by everything that determines its output.
fn cache_key(job: &JobRecord) -> Option<String> {
    let skeleton = serde_json::to_vec(&job.sources.skeleton).ok()?;
    let settings = serde_json::to_vec(&job.settings).ok()?;
    let mut material = Vec::with_capacity(skeleton.len() + settings.len() + 130);
    material.extend_from_slice(job.sources.mesh.as_str().as_bytes());
    material.push(b'\n');
    material.extend_from_slice(job.sources.clip.as_str().as_bytes());
    material.push(b'\n');
    material.extend_from_slice(&skeleton);
    material.push(b'\n');
    material.extend_from_slice(&settings);
    Some(sha256_hex(&material))
}

impl JobProcessor for RetargetProcessor {
    fn process(&self, job: &JobRecord, ctx: &JobContext) -> Result<ArtifactRef, ProcessError> {
        let key = self.cache.as_ref().and_then(|_| cache_key(job));
        if let Some(hit) = key.as_deref().and_then(|k| self.cached(k)) {
            debug!(job_id = %job.id, output = %hit, "output cache hit");
            ctx.checkpoint(stage::STORED)?;
            return Ok(hit);
        }

        self.store
            .meta(&job.sources.mesh)
            .map_err(source_error)?;
        let clip_bytes = self.fetch(&job.sources.clip)?;
        ctx.checkpoint(stage::FETCHED)?;

        let clip = AnimationClip::from_json(&clip_bytes).map_err(|e| {
            ErrorInfo::new(ErrorKind::MalformedSource, format!("clip {}: {e}", job.sources.clip))
        })?;
        let mapping = self.engine.map_joints(&job.sources.skeleton, &clip)?;
        ctx.checkpoint(stage::MAPPED)?;

        let baked = self
            .engine
            .bake(&job.sources.skeleton, &clip, &mapping, &job.settings)?;
        ctx.checkpoint(stage::BAKED)?;

        let document = OutputDocument {
            format: OutputDocument::FORMAT.to_string(),
            version: OutputDocument::VERSION,
            character_id: job.character.clone(),
            animation_id: job.animation.clone(),
            mesh_hash: job.sources.mesh.to_string(),
            export_format: job.settings.export_format().to_string(),
            settings: job.settings.clone(),
            clip: baked,
        };
        let bytes = document
            .to_json()
            .map_err(|e| ErrorInfo::worker_fault(format!("encoding output: {e}")))?;
        let output = self
            .store
            .put_bytes(&bytes, ArtifactKind::Output)
            .map_err(|e| ErrorInfo::worker_fault(format!("storing output: {e}")))?;
        ctx.checkpoint(stage::STORED)?;

        info!(
            job_id = %job.id,
            attempt = ctx.attempt(),
            output = %output,
            size = bytes.len(),
            mapped = mapping.mapped_count(),
            "baked output stored"
        );
        if let Some(key) = key {
            self.remember(key, &output);
        }
        Ok(output)
    }
}
