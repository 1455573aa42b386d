use thiserror::Error;

use animforge_core::JobId;
use animforge_infra::jobs::JobState;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessingError {
    /// Unknown asset, or one the caller may not use.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The asset resolved but its source artifact is not stored.
    #[error("asset missing: {0}")]
    AssetMissing(String),

    #[error("rate limited: at most {limit} active jobs per caller")]
    RateLimited { limit: usize },

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {job_id} is {state}, not completed")]
    NotReady { job_id: JobId, state: JobState },

    #[error("result of job {0} is no longer available")]
    Gone(JobId),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ProcessingError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ProcessingError::InvalidReference(_) => "invalid_reference",
            ProcessingError::InvalidSettings(_) => "invalid_settings",
            ProcessingError::AssetMissing(_) => "asset_missing",
            ProcessingError::RateLimited { .. } => "rate_limited",
            ProcessingError::NotFound(_) => "not_found",
            ProcessingError::NotReady { .. } => "not_ready",
            ProcessingError::Gone(_) => "gone",
            ProcessingError::Unavailable(_) => "unavailable",
        }
    }
}
