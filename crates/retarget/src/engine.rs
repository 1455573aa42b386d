//! Retarget engine: skeleton mapping plus frame baking.

use crate::bake;
use crate::clip::{AnimationClip, BakedClip};
use crate::error::RetargetError;
use crate::mapping::{self, JointMapping};
use crate::settings::RetargetSettings;
use crate::skeleton::Skeleton;

/// Default share of required humanoid roles that may go unmapped.
pub const DEFAULT_TOLERANCE: f32 = 0.15;

/// Deterministic `(skeleton, clip, settings) -> baked clip` transform.
///
/// The two stages are exposed separately so long-running callers can
/// checkpoint between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetargetEngine {
    tolerance: f32,
}

impl Default for RetargetEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RetargetEngine {
    pub fn new() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance.clamp(0.0, 1.0);
        self
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Validate both rigs and map the character's joints onto the clip's.
    pub fn map_joints(
        &self,
        character: &Skeleton,
        clip: &AnimationClip,
    ) -> Result<JointMapping, RetargetError> {
        character.validate()?;
        clip.validate()?;
        mapping::map_joints(character, &clip.skeleton, self.tolerance)
    }

    /// Bake `clip` onto `character` with a mapping from [`Self::map_joints`].
    pub fn bake(
        &self,
        character: &Skeleton,
        clip: &AnimationClip,
        mapping: &JointMapping,
        settings: &RetargetSettings,
    ) -> Result<BakedClip, RetargetError> {
        bake::bake(character, clip, mapping, settings)
    }

    /// Run the whole transform.
    pub fn retarget(
        &self,
        character: &Skeleton,
        clip: &AnimationClip,
        settings: &RetargetSettings,
    ) -> Result<BakedClip, RetargetError> {
        settings.validate()?;
        let mapping = self.map_joints(character, clip)?;
        self.bake(character, clip, &mapping, settings)
    }
}
