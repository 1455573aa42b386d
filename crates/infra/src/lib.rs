//! Infrastructure layer: artifact storage, the asset catalog, configuration
//! and the job pipeline.

pub mod artifacts;
pub mod catalog;
pub mod config;
pub mod jobs;

#[cfg(test)]
mod integration_tests;
