//! `animforge-retarget`
//!
//! **Responsibility:** the retarget/bake computation.
//!
//! This crate is pure:
//! - It performs no IO and holds no hidden state.
//! - Identical inputs produce identical outputs (the pipeline relies on this
//!   for output caching and byte-identical results).
//! - It knows nothing about jobs, storage or callers.

pub mod bake;
pub mod clip;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod presets;
pub mod settings;
pub mod skeleton;

pub use bake::bake;
pub use clip::{AnimationClip, BakedClip, BakedFrame, Frame};
pub use engine::RetargetEngine;
pub use error::RetargetError;
pub use mapping::{JointMapping, map_joints};
pub use settings::RetargetSettings;
pub use skeleton::{Joint, JointRole, Side, Skeleton, normalize_joint_name};
