use serde::{Deserialize, Serialize};

use animforge_core::JobId;
use animforge_infra::jobs::{JobState, Priority};
use animforge_processing::ProcessingError;
use animforge_retarget::RetargetSettings;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ApplyAnimationRequest {
    #[serde(alias = "characterId")]
    pub character_id: String,
    #[serde(alias = "animationId")]
    pub animation_id: String,
    /// Kept raw so a bad value is reported as a settings error rather than
    /// a body rejection.
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
}

impl ApplyAnimationRequest {
    pub fn settings(&self) -> Result<RetargetSettings, ProcessingError> {
        RetargetSettings::from_json(self.settings.clone())
            .map_err(|e| ProcessingError::InvalidSettings(e.to_string()))
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmittedResponse {
    pub job_id: JobId,
    pub state: JobState,
}
