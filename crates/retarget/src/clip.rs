//! Source animation clips and baked output clips.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::RetargetError;
use crate::skeleton::Skeleton;

const UNIT_QUAT_TOLERANCE: f32 = 1e-3;

/// One sampled pose: a root translation plus a local rotation per joint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Seconds from clip start.
    pub time: f32,
    pub root_translation: Vec3,
    /// Local joint rotations, indexed like the clip skeleton's joints.
    pub rotations: Vec<Quat>,
}

/// Motion-capture clip recorded against its own skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationClip {
    pub name: String,
    pub frame_rate: f32,
    pub skeleton: Skeleton,
    pub frames: Vec<Frame>,
}

impl AnimationClip {
    /// Timestamp of the last frame.
    pub fn duration(&self) -> f32 {
        self.frames.last().map(|f| f.time).unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), RetargetError> {
        self.skeleton.validate()?;

        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(RetargetError::MalformedClip(format!(
                "frame rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.frames.is_empty() {
            return Err(RetargetError::MalformedClip("clip has no frames".into()));
        }

        let joints = self.skeleton.len();
        let mut previous = 0.0_f32;
        for (idx, frame) in self.frames.iter().enumerate() {
            if !frame.time.is_finite() || frame.time < previous {
                return Err(RetargetError::MalformedClip(format!(
                    "frame #{idx} has time {} which is not after {previous}",
                    frame.time
                )));
            }
            previous = frame.time;

            if !frame.root_translation.is_finite() {
                return Err(RetargetError::MalformedClip(format!(
                    "frame #{idx} has a non-finite root translation"
                )));
            }
            if frame.rotations.len() != joints {
                return Err(RetargetError::MalformedClip(format!(
                    "frame #{idx} has {} rotations for {joints} joints",
                    frame.rotations.len()
                )));
            }
            if frame
                .rotations
                .iter()
                .any(|q| !q.is_finite() || (q.length() - 1.0).abs() > UNIT_QUAT_TOLERANCE)
            {
                return Err(RetargetError::MalformedClip(format!(
                    "frame #{idx} contains a non-unit rotation"
                )));
            }
        }

        Ok(())
    }

    /// Decode the native JSON clip encoding.
    pub fn from_json(bytes: &[u8]) -> Result<Self, RetargetError> {
        serde_json::from_slice(bytes).map_err(|e| RetargetError::MalformedClip(e.to_string()))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, RetargetError> {
        serde_json::to_vec(self).map_err(|e| RetargetError::MalformedClip(e.to_string()))
    }
}

/// A pose of the target character at one output timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakedFrame {
    pub time: f32,
    pub root_translation: Vec3,
    /// Local rotations, indexed like [`BakedClip::joints`].
    pub rotations: Vec<Quat>,
}

/// Clip baked onto a character's own joint hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakedClip {
    pub name: String,
    pub frame_rate: f32,
    pub duration: f32,
    pub joints: Vec<String>,
    pub frames: Vec<BakedFrame>,
}

impl BakedClip {
    pub fn from_json(bytes: &[u8]) -> Result<Self, RetargetError> {
        serde_json::from_slice(bytes).map_err(|e| RetargetError::MalformedClip(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::Joint;

    fn two_joint_clip() -> AnimationClip {
        AnimationClip {
            name: "nod".into(),
            frame_rate: 2.0,
            skeleton: Skeleton::new(vec![
                Joint::new("Hips", None, Vec3::Y),
                Joint::new("Head", Some(0), Vec3::Y),
            ]),
            frames: vec![
                Frame {
                    time: 0.0,
                    root_translation: Vec3::Y,
                    rotations: vec![Quat::IDENTITY; 2],
                },
                Frame {
                    time: 0.5,
                    root_translation: Vec3::Y,
                    rotations: vec![Quat::IDENTITY, Quat::from_rotation_x(0.3)],
                },
            ],
        }
    }

    #[test]
    fn duration_is_last_timestamp() {
        assert_eq!(two_joint_clip().duration(), 0.5);
    }

    #[test]
    fn json_encoding_decodes_back() {
        let clip = two_joint_clip();
        let bytes = clip.to_json().unwrap();
        assert_eq!(AnimationClip::from_json(&bytes).unwrap(), clip);
    }

    #[test]
    fn garbage_is_a_malformed_clip() {
        assert!(matches!(
            AnimationClip::from_json(b"FBX binary\0\0"),
            Err(RetargetError::MalformedClip(_))
        ));
    }

    #[test]
    fn rejects_rotation_count_mismatch() {
        let mut clip = two_joint_clip();
        clip.frames[1].rotations.pop();
        assert!(matches!(
            clip.validate(),
            Err(RetargetError::MalformedClip(msg)) if msg.contains("1 rotations for 2 joints")
        ));
    }

    #[test]
    fn rejects_time_going_backwards() {
        let mut clip = two_joint_clip();
        clip.frames[1].time = -1.0;
        assert!(clip.validate().is_err());
    }

    #[test]
    fn rejects_empty_clip_and_bad_frame_rate() {
        let mut clip = two_joint_clip();
        clip.frame_rate = 0.0;
        assert!(clip.validate().is_err());

        let mut clip = two_joint_clip();
        clip.frames.clear();
        assert!(clip.validate().is_err());
    }
}
