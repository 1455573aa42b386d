//! Frame baking: transfer clip poses onto the target hierarchy.

use glam::Quat;

use crate::clip::{AnimationClip, BakedClip, BakedFrame};
use crate::error::RetargetError;
use crate::mapping::JointMapping;
use crate::settings::RetargetSettings;
use crate::skeleton::Skeleton;

const MIN_HIP_HEIGHT: f32 = 1e-4;

/// Bake `clip` onto `target` using a precomputed joint mapping.
///
/// Rotations move as deltas from the source rest pose onto the target rest
/// pose. Root motion is scaled by the hip-height ratio of the two rigs.
pub fn bake(
    target: &Skeleton,
    clip: &AnimationClip,
    mapping: &JointMapping,
    settings: &RetargetSettings,
) -> Result<BakedClip, RetargetError> {
    if mapping.sources.len() != target.len() {
        return Err(RetargetError::MalformedSkeleton(format!(
            "mapping covers {} joints but the character has {}",
            mapping.sources.len(),
            target.len()
        )));
    }
    clip.validate()?;
    let source_joints = clip.skeleton.len();
    if let Some(src) = mapping.sources.iter().flatten().find(|&&src| src >= source_joints) {
        return Err(RetargetError::MalformedClip(format!(
            "mapping refers to joint #{src} but the clip skeleton has {source_joints}"
        )));
    }
    settings.validate()?;

    let speed = settings.speed_multiplier;
    let arm = settings.arm_blend();
    let root_scale = root_scale(target, &clip.skeleton);

    let frames = clip
        .frames
        .iter()
        .map(|frame| {
            let rotations = target
                .joints
                .iter()
                .enumerate()
                .map(|(idx, joint)| {
                    let transferred = match mapping.source_for(idx) {
                        Some(src) => {
                            let src_rest = clip.skeleton.joints[src].rest_rotation;
                            (joint.rest_rotation * src_rest.inverse() * frame.rotations[src])
                                .normalize()
                        }
                        None => joint.rest_rotation,
                    };
                    let is_girdle = joint.resolved_role().is_some_and(|r| r.is_shoulder_girdle());
                    if is_girdle {
                        blend_toward(transferred, joint.rest_rotation, arm)
                    } else {
                        transferred
                    }
                })
                .collect();

            BakedFrame {
                time: frame.time / speed,
                root_translation: frame.root_translation * root_scale,
                rotations,
            }
        })
        .collect();

    Ok(BakedClip {
        name: clip.name.clone(),
        frame_rate: clip.frame_rate * speed,
        duration: clip.duration() / speed,
        joints: target.joints.iter().map(|j| j.name.clone()).collect(),
        frames,
    })
}

fn root_scale(target: &Skeleton, source: &Skeleton) -> f32 {
    match (target.hip_height(), source.hip_height()) {
        (Some(t), Some(s)) if s.abs() > MIN_HIP_HEIGHT && t.is_finite() => t / s,
        _ => 1.0,
    }
}

/// Move `from` a fraction `t` of the way toward `to` along the shortest arc.
///
/// `t = 0` returns `from` untouched; `t > 1` keeps rotating past `to` about
/// the same axis.
pub fn blend_toward(from: Quat, to: Quat, t: f32) -> Quat {
    if t == 0.0 {
        return from;
    }
    let mut delta = from.inverse() * to;
    if delta.w < 0.0 {
        delta = -delta;
    }
    let (axis, angle) = delta.normalize().to_axis_angle();
    if angle.abs() < f32::EPSILON || !axis.is_finite() || axis.length_squared() < 0.5 {
        return from;
    }
    (from * Quat::from_axis_angle(axis, angle * t)).normalize()
}

/// Angle in radians between two orientations.
pub fn angle_between(a: Quat, b: Quat) -> f32 {
    let dot = a.dot(b).abs().min(1.0);
    2.0 * dot.acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::map_joints;
    use crate::presets;

    fn same_rotation(a: Quat, b: Quat) -> bool {
        a.abs_diff_eq(b, 1e-4) || a.abs_diff_eq(-b, 1e-4)
    }

    fn fixture() -> (Skeleton, AnimationClip, JointMapping) {
        let target = presets::humanoid_rig("mixamorig:", 1.0);
        let clip = presets::locomotion_clip("Walking", &presets::mocap_rig(), 1.2, 30.0, 0.5);
        let mapping = map_joints(&target, &clip.skeleton, 0.15).unwrap();
        (target, clip, mapping)
    }

    #[test]
    fn mapping_from_another_clip_is_rejected() {
        let (target, _, mapping) = fixture();
        let tiny = presets::locomotion_clip("Idle", &presets::serpent_rig(), 1.0, 30.0, 0.0);
        assert!(tiny.skeleton.len() < presets::mocap_rig().len());

        let err = bake(&target, &tiny, &mapping, &RetargetSettings::default()).unwrap_err();
        assert!(matches!(err, RetargetError::MalformedClip(_)), "{err}");
    }

    #[test]
    fn malformed_clip_is_rejected_before_baking() {
        let (target, mut clip, mapping) = fixture();
        clip.frames[3].rotations.pop();

        let err = bake(&target, &clip, &mapping, &RetargetSettings::default()).unwrap_err();
        assert!(matches!(err, RetargetError::MalformedClip(_)), "{err}");
    }

    #[test]
    fn speed_rescales_timestamps() {
        let (target, clip, mapping) = fixture();

        let slow = bake(&target, &clip, &mapping, &RetargetSettings::default().with_speed(0.1)).unwrap();
        assert!((slow.duration - 12.0).abs() < 1e-3);
        assert!((slow.frames.last().unwrap().time - 12.0).abs() < 1e-3);

        let fast = bake(&target, &clip, &mapping, &RetargetSettings::default().with_speed(3.0)).unwrap();
        assert!((fast.duration - 0.4).abs() < 1e-4);
        assert_eq!(fast.frames.len(), clip.frames.len());
        assert!((fast.frame_rate - 90.0).abs() < 1e-3);
    }

    #[test]
    fn zero_arm_spacing_keeps_the_transferred_pose_exactly() {
        let (target, clip, mapping) = fixture();
        let baked = bake(&target, &clip, &mapping, &RetargetSettings::default().with_arm_spacing(0)).unwrap();

        let arm = target.joint_index("mixamorig:LeftArm").unwrap();
        let src = mapping.source_for(arm).unwrap();
        let src_rest = clip.skeleton.joints[src].rest_rotation;
        let tgt_rest = target.joints[arm].rest_rotation;
        for (frame, out) in clip.frames.iter().zip(&baked.frames) {
            let expected = (tgt_rest * src_rest.inverse() * frame.rotations[src]).normalize();
            assert_eq!(out.rotations[arm], expected);
        }
    }

    #[test]
    fn full_arm_spacing_reaches_rest_stance() {
        let (target, clip, mapping) = fixture();
        let baked = bake(&target, &clip, &mapping, &RetargetSettings::default().with_arm_spacing(100)).unwrap();

        let arm = target.joint_index("mixamorig:RightArm").unwrap();
        let rest = target.joints[arm].rest_rotation;
        for out in &baked.frames {
            assert!(same_rotation(out.rotations[arm], rest));
        }
    }

    #[test]
    fn double_arm_spacing_extrapolates_past_rest() {
        let (target, clip, mapping) = fixture();
        let at = |percent: u16| {
            bake(&target, &clip, &mapping, &RetargetSettings::default().with_arm_spacing(percent)).unwrap()
        };
        let (none, full, max) = (at(0), at(100), at(200));

        let arm = target.joint_index("mixamorig:LeftArm").unwrap();
        // Frame 9 is a quarter cycle in: maximal swing.
        let swing_full = angle_between(none.frames[9].rotations[arm], full.frames[9].rotations[arm]);
        let swing_max = angle_between(none.frames[9].rotations[arm], max.frames[9].rotations[arm]);
        assert!(swing_full > 0.1);
        assert!((swing_max - 2.0 * swing_full).abs() < 1e-3);
    }

    #[test]
    fn arm_spacing_leaves_legs_alone() {
        let (target, clip, mapping) = fixture();
        let a = bake(&target, &clip, &mapping, &RetargetSettings::default().with_arm_spacing(0)).unwrap();
        let b = bake(&target, &clip, &mapping, &RetargetSettings::default().with_arm_spacing(200)).unwrap();
        let leg = target.joint_index("mixamorig:LeftUpLeg").unwrap();
        for (x, y) in a.frames.iter().zip(&b.frames) {
            assert_eq!(x.rotations[leg], y.rotations[leg]);
        }
    }

    #[test]
    fn root_motion_scales_with_hip_height() {
        let target = presets::humanoid_rig("", 1.9);
        let clip = presets::locomotion_clip("Walking", &presets::mocap_rig(), 1.2, 30.0, 0.5);
        let mapping = map_joints(&target, &clip.skeleton, 0.15).unwrap();
        let baked = bake(&target, &clip, &mapping, &RetargetSettings::default()).unwrap();

        let ratio = 1.9 / 0.95;
        let last = clip.frames.last().unwrap();
        let out = baked.frames.last().unwrap();
        assert!((out.root_translation - last.root_translation * ratio).length() < 1e-4);
    }

    #[test]
    fn rejects_mapping_for_another_rig() {
        let (_, clip, mapping) = fixture();
        let other = presets::serpent_rig();
        assert!(matches!(
            bake(&other, &clip, &mapping, &RetargetSettings::default()),
            Err(RetargetError::MalformedSkeleton(_))
        ));
    }

    #[test]
    fn blend_toward_interpolates_along_shortest_arc() {
        let from = Quat::IDENTITY;
        let to = Quat::from_rotation_z(1.0);
        assert_eq!(blend_toward(from, to, 0.0), from);
        assert!(same_rotation(blend_toward(from, to, 0.5), Quat::from_rotation_z(0.5)));
        assert!(same_rotation(blend_toward(from, to, 2.0), Quat::from_rotation_z(2.0)));
        assert_eq!(blend_toward(to, to, 1.5), to);
    }
}
