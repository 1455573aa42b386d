//! Errors raised by pipeline values before any I/O happens.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic rejection of an identifier, a setting or a job transition.
///
/// Retrying the same call always fails the same way.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },

    /// A retarget setting is missing its expected type or range.
    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting { field: String, reason: String },

    /// The job's current state does not allow the requested step.
    #[error("cannot {action} job {job} while it is {state}")]
    InvalidTransition {
        job: String,
        action: &'static str,
        state: String,
    },
}

impl DomainError {
    pub fn invalid_id(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            kind,
            reason: reason.into(),
        }
    }

    pub fn invalid_setting(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(
        job: impl ToString,
        action: &'static str,
        state: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            job: job.to_string(),
            action,
            state: state.to_string(),
        }
    }

    /// The offending setting, for settings errors.
    pub fn setting(&self) -> Option<&str> {
        match self {
            Self::InvalidSetting { field, .. } => Some(field),
            _ => None,
        }
    }
}
