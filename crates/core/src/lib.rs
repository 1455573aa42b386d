//! `animforge-core` — identifiers and the domain error model shared by every
//! pipeline crate.
//!
//! This crate contains no infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AssetId, CallerId, JobId};
