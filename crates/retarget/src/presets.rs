//! Reference rigs and procedural clips.
//!
//! Used to seed demo catalogs and as fixtures; real assets arrive through the
//! artifact store.

use std::f32::consts::TAU;

use glam::{Quat, Vec3};

use crate::clip::{AnimationClip, Frame};
use crate::skeleton::{Joint, JointRole, Skeleton};

/// Upper-arm rest angle of the A-pose humanoid.
const A_POSE_ANGLE: f32 = 0.7;

/// Mixamo-style humanoid in an A-pose, hips at `scale` units.
///
/// `prefix` is prepended to every joint name (`"mixamorig:"` for rigs exported
/// straight from Mixamo).
pub fn humanoid_rig(prefix: &str, scale: f32) -> Skeleton {
    let j = |name: &str, parent: Option<usize>, t: Vec3| {
        Joint::new(format!("{prefix}{name}"), parent, t * scale)
    };

    Skeleton::new(vec![
        j("Hips", None, Vec3::new(0.0, 1.0, 0.0)),
        j("Spine", Some(0), Vec3::new(0.0, 0.1, 0.0)),
        j("Spine1", Some(1), Vec3::new(0.0, 0.12, 0.0)),
        j("Spine2", Some(2), Vec3::new(0.0, 0.12, 0.0)),
        j("Neck", Some(3), Vec3::new(0.0, 0.15, 0.0)),
        j("Head", Some(4), Vec3::new(0.0, 0.1, 0.0)),
        j("LeftShoulder", Some(3), Vec3::new(0.05, 0.12, 0.0)),
        j("LeftArm", Some(6), Vec3::new(0.12, 0.0, 0.0))
            .with_rest_rotation(Quat::from_rotation_z(-A_POSE_ANGLE)),
        j("LeftForeArm", Some(7), Vec3::new(0.27, 0.0, 0.0)),
        j("LeftHand", Some(8), Vec3::new(0.25, 0.0, 0.0)),
        j("RightShoulder", Some(3), Vec3::new(-0.05, 0.12, 0.0)),
        j("RightArm", Some(10), Vec3::new(-0.12, 0.0, 0.0))
            .with_rest_rotation(Quat::from_rotation_z(A_POSE_ANGLE)),
        j("RightForeArm", Some(11), Vec3::new(-0.27, 0.0, 0.0)),
        j("RightHand", Some(12), Vec3::new(-0.25, 0.0, 0.0)),
        j("LeftUpLeg", Some(0), Vec3::new(0.09, -0.05, 0.0)),
        j("LeftLeg", Some(14), Vec3::new(0.0, -0.45, 0.0)),
        j("LeftFoot", Some(15), Vec3::new(0.0, -0.42, 0.0)),
        j("RightUpLeg", Some(0), Vec3::new(-0.09, -0.05, 0.0)),
        j("RightLeg", Some(17), Vec3::new(0.0, -0.45, 0.0)),
        j("RightFoot", Some(18), Vec3::new(0.0, -0.42, 0.0)),
    ])
}

/// Motion-capture rig in a T-pose with game-engine naming. A few spine joints
/// carry explicit roles because their names are ambiguous.
pub fn mocap_rig() -> Skeleton {
    Skeleton::new(vec![
        Joint::new("pelvis", None, Vec3::new(0.0, 0.95, 0.0)),
        Joint::new("spine_01", Some(0), Vec3::new(0.0, 0.1, 0.0)).with_role(JointRole::Spine),
        Joint::new("spine_02", Some(1), Vec3::new(0.0, 0.2, 0.0)).with_role(JointRole::Chest),
        Joint::new("neck_01", Some(2), Vec3::new(0.0, 0.18, 0.0)).with_role(JointRole::Neck),
        Joint::new("head", Some(3), Vec3::new(0.0, 0.1, 0.0)),
        Joint::new("clavicle_l", Some(2), Vec3::new(0.04, 0.15, 0.0)),
        Joint::new("upperarm_l", Some(5), Vec3::new(0.13, 0.0, 0.0)),
        Joint::new("lowerarm_l", Some(6), Vec3::new(0.26, 0.0, 0.0)),
        Joint::new("hand_l", Some(7), Vec3::new(0.24, 0.0, 0.0)),
        Joint::new("clavicle_r", Some(2), Vec3::new(-0.04, 0.15, 0.0)),
        Joint::new("upperarm_r", Some(9), Vec3::new(-0.13, 0.0, 0.0)),
        Joint::new("lowerarm_r", Some(10), Vec3::new(-0.26, 0.0, 0.0)),
        Joint::new("hand_r", Some(11), Vec3::new(-0.24, 0.0, 0.0)),
        Joint::new("thigh_l", Some(0), Vec3::new(0.1, -0.04, 0.0)),
        Joint::new("calf_l", Some(13), Vec3::new(0.0, -0.43, 0.0)),
        Joint::new("foot_l", Some(14), Vec3::new(0.0, -0.4, 0.0)),
        Joint::new("thigh_r", Some(0), Vec3::new(-0.1, -0.04, 0.0)),
        Joint::new("calf_r", Some(16), Vec3::new(0.0, -0.43, 0.0)),
        Joint::new("foot_r", Some(17), Vec3::new(0.0, -0.4, 0.0)),
    ])
}

/// A limbless creature: only its spine can be driven by a humanoid clip.
pub fn serpent_rig() -> Skeleton {
    Skeleton::new(vec![
        Joint::new("body", None, Vec3::new(0.0, 0.2, 0.0)),
        Joint::new("Spine", Some(0), Vec3::new(0.0, 0.0, 0.3)),
        Joint::new("segment_01", Some(1), Vec3::new(0.0, 0.0, 0.3)),
        Joint::new("segment_02", Some(2), Vec3::new(0.0, 0.0, 0.3)),
        Joint::new("segment_03", Some(3), Vec3::new(0.0, 0.0, 0.3)),
        Joint::new("tail", Some(4), Vec3::new(0.0, 0.0, 0.3)),
    ])
}

/// Procedural locomotion cycle on `skeleton`: one full stride per clip.
///
/// `stride` scales limb swing in radians; near zero gives an idle sway.
pub fn locomotion_clip(
    name: &str,
    skeleton: &Skeleton,
    duration: f32,
    frame_rate: f32,
    stride: f32,
) -> AnimationClip {
    let frame_count = (duration * frame_rate).round().max(1.0) as usize;
    let hip = skeleton.hip_height().unwrap_or(1.0);

    let frames = (0..=frame_count)
        .map(|i| {
            let time = i as f32 / frame_rate;
            let phase = TAU * time / duration;
            let swing = stride * phase.sin();

            let rotations = skeleton
                .joints
                .iter()
                .map(|joint| {
                    let delta = match joint.resolved_role() {
                        Some(JointRole::LeftUpperLeg) => Quat::from_rotation_x(swing),
                        Some(JointRole::RightUpperLeg) => Quat::from_rotation_x(-swing),
                        Some(JointRole::LeftLowerLeg) => Quat::from_rotation_x(0.8 * swing.max(0.0)),
                        Some(JointRole::RightLowerLeg) => {
                            Quat::from_rotation_x(0.8 * (-swing).max(0.0))
                        }
                        Some(JointRole::LeftUpperArm) => Quat::from_rotation_x(-0.6 * swing),
                        Some(JointRole::RightUpperArm) => Quat::from_rotation_x(0.6 * swing),
                        Some(JointRole::Spine) => Quat::from_rotation_y(0.1 * swing),
                        _ => Quat::IDENTITY,
                    };
                    (joint.rest_rotation * delta).normalize()
                })
                .collect();

            Frame {
                time,
                root_translation: Vec3::new(
                    0.0,
                    hip + 0.03 * (2.0 * phase).cos(),
                    1.2 * stride * time,
                ),
                rotations,
            }
        })
        .collect();

    AnimationClip {
        name: name.to_string(),
        frame_rate,
        skeleton: skeleton.clone(),
        frames,
    }
}
