use thiserror::Error;

use crate::skeleton::JointRole;

/// Failure of a retarget computation.
///
/// Every variant is deterministic: the same inputs always fail the same way,
/// so callers should never retry on these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetargetError {
    #[error("unsupported skeleton: {} of {required} required joints unmapped ({})", missing.len(), join_roles(missing))]
    UnsupportedSkeleton {
        missing: Vec<JointRole>,
        required: usize,
    },

    #[error("malformed skeleton: {0}")]
    MalformedSkeleton(String),

    #[error("malformed clip: {0}")]
    MalformedClip(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

fn join_roles(roles: &[JointRole]) -> String {
    roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<animforge_core::DomainError> for RetargetError {
    fn from(err: animforge_core::DomainError) -> Self {
        RetargetError::InvalidSettings(err.to_string())
    }
}
