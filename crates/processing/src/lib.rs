//! Caller-facing façade over the retarget pipeline.
//!
//! Every operation takes the caller's identity explicitly; a job is only
//! visible to the caller that submitted it.

pub mod error;
pub mod service;
pub mod view;

pub use error::ProcessingError;
pub use service::ProcessingService;
pub use view::{ArtifactLocator, JobStatus};
