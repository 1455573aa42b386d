//! Correspondence between a character's joints and a clip's joints.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::RetargetError;
use crate::skeleton::{JointRole, Skeleton, normalize_joint_name};

/// For every joint of the target skeleton, the index of the source joint
/// driving it (if any).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JointMapping {
    pub sources: Vec<Option<usize>>,
    /// Required roles left without a driver (within tolerance).
    pub missing: Vec<JointRole>,
}

impl JointMapping {
    pub fn source_for(&self, target: usize) -> Option<usize> {
        self.sources.get(target).copied().flatten()
    }

    pub fn mapped_count(&self) -> usize {
        self.sources.iter().filter(|s| s.is_some()).count()
    }
}

/// Map `target` joints onto `source` joints.
///
/// Role correspondence is tried first, then normalised names. Fails with
/// [`RetargetError::UnsupportedSkeleton`] when the share of unmapped required
/// roles exceeds `tolerance`.
pub fn map_joints(
    target: &Skeleton,
    source: &Skeleton,
    tolerance: f32,
) -> Result<JointMapping, RetargetError> {
    let mut by_role: HashMap<JointRole, usize> = HashMap::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (idx, joint) in source.joints.iter().enumerate() {
        if let Some(role) = joint.resolved_role() {
            by_role.entry(role).or_insert(idx);
        }
        by_name.entry(normalize_joint_name(&joint.name)).or_insert(idx);
    }

    let mut sources = Vec::with_capacity(target.len());
    let mut target_roles = Vec::with_capacity(target.len());
    for joint in &target.joints {
        let role = joint.resolved_role();
        let driver = role
            .and_then(|r| by_role.get(&r).copied())
            .or_else(|| by_name.get(&normalize_joint_name(&joint.name)).copied());
        sources.push(driver);
        target_roles.push(role);
    }

    let missing: Vec<JointRole> = JointRole::REQUIRED
        .iter()
        .copied()
        .filter(|required| {
            !target_roles
                .iter()
                .zip(&sources)
                .any(|(role, driver)| *role == Some(*required) && driver.is_some())
        })
        .collect();

    let required = JointRole::REQUIRED.len();
    let missing_share = missing.len() as f32 / required as f32;
    if missing_share > tolerance.clamp(0.0, 1.0) {
        return Err(RetargetError::UnsupportedSkeleton { missing, required });
    }

    Ok(JointMapping { sources, missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets;
    use crate::skeleton::Joint;
    use glam::Vec3;

    #[test]
    fn maps_mixamo_rig_onto_mocap_rig_by_role() {
        let target = presets::humanoid_rig("mixamorig:", 1.0);
        let source = presets::mocap_rig();
        let mapping = map_joints(&target, &source, 0.15).unwrap();

        assert!(mapping.missing.is_empty());
        let left_arm = target.joint_index("mixamorig:LeftArm").unwrap();
        let upperarm_l = source.joint_index("upperarm_l").unwrap();
        assert_eq!(mapping.source_for(left_arm), Some(upperarm_l));
    }

    #[test]
    fn falls_back_to_normalised_names() {
        let target = Skeleton::new(vec![
            Joint::new("Root", None, Vec3::ZERO),
            Joint::new("Tail_01", Some(0), Vec3::Z),
        ]);
        let source = Skeleton::new(vec![
            Joint::new("rig|root", None, Vec3::ZERO),
            Joint::new("tail01", Some(0), Vec3::Z),
        ]);
        let mapping = map_joints(&target, &source, 1.0).unwrap();
        assert_eq!(mapping.sources, vec![Some(0), Some(1)]);
    }

    #[test]
    fn one_missing_role_is_within_default_tolerance() {
        let target = presets::humanoid_rig("", 1.0);
        let mut source = presets::mocap_rig();
        let head = source.joint_index("head").unwrap();
        source.joints[head].name = "skull".into();

        let mapping = map_joints(&target, &source, 0.15).unwrap();
        assert_eq!(mapping.missing, vec![JointRole::Head]);
        let target_head = target.joint_index("Head").unwrap();
        assert_eq!(mapping.source_for(target_head), None);
    }

    #[test]
    fn rejects_rig_missing_too_many_roles() {
        let target = presets::serpent_rig();
        let source = presets::mocap_rig();
        let err = map_joints(&target, &source, 0.15).unwrap_err();
        match err {
            RetargetError::UnsupportedSkeleton { missing, required } => {
                assert_eq!(required, 13);
                assert!(missing.len() > 1);
                assert!(missing.contains(&JointRole::LeftUpperArm));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn full_tolerance_accepts_anything() {
        let target = presets::serpent_rig();
        let source = presets::mocap_rig();
        assert!(map_joints(&target, &source, 1.0).is_ok());
    }
}
