//! Skeleton descriptors and joint role inference.

use std::collections::HashSet;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::RetargetError;

/// Body side of a limb joint.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// Semantic role of a joint in a humanoid hierarchy.
///
/// Roles let two rigs with unrelated naming conventions be matched.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointRole {
    Hips,
    Spine,
    Chest,
    Neck,
    Head,
    LeftShoulder,
    LeftUpperArm,
    LeftLowerArm,
    LeftHand,
    RightShoulder,
    RightUpperArm,
    RightLowerArm,
    RightHand,
    LeftUpperLeg,
    LeftLowerLeg,
    LeftFoot,
    RightUpperLeg,
    RightLowerLeg,
    RightFoot,
}

impl JointRole {
    /// Roles a rig must provide for a humanoid clip to be transferable.
    pub const REQUIRED: [JointRole; 13] = [
        JointRole::Hips,
        JointRole::Spine,
        JointRole::Head,
        JointRole::LeftUpperArm,
        JointRole::LeftLowerArm,
        JointRole::RightUpperArm,
        JointRole::RightLowerArm,
        JointRole::LeftUpperLeg,
        JointRole::LeftLowerLeg,
        JointRole::LeftFoot,
        JointRole::RightUpperLeg,
        JointRole::RightLowerLeg,
        JointRole::RightFoot,
    ];

    /// Joints whose rotation the arm-spacing setting adjusts.
    pub fn is_shoulder_girdle(self) -> bool {
        matches!(
            self,
            JointRole::LeftShoulder
                | JointRole::RightShoulder
                | JointRole::LeftUpperArm
                | JointRole::RightUpperArm
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JointRole::Hips => "hips",
            JointRole::Spine => "spine",
            JointRole::Chest => "chest",
            JointRole::Neck => "neck",
            JointRole::Head => "head",
            JointRole::LeftShoulder => "left_shoulder",
            JointRole::LeftUpperArm => "left_upper_arm",
            JointRole::LeftLowerArm => "left_lower_arm",
            JointRole::LeftHand => "left_hand",
            JointRole::RightShoulder => "right_shoulder",
            JointRole::RightUpperArm => "right_upper_arm",
            JointRole::RightLowerArm => "right_lower_arm",
            JointRole::RightHand => "right_hand",
            JointRole::LeftUpperLeg => "left_upper_leg",
            JointRole::LeftLowerLeg => "left_lower_leg",
            JointRole::LeftFoot => "left_foot",
            JointRole::RightUpperLeg => "right_upper_leg",
            JointRole::RightLowerLeg => "right_lower_leg",
            JointRole::RightFoot => "right_foot",
        }
    }

    /// Infer a role from a joint name.
    ///
    /// Understands the common conventions: `LeftUpLeg`, `mixamorig:LeftArm`,
    /// `l_upperarm`, `UpperArm.R`, `pelvis`, `Spine1`.
    pub fn infer(name: &str) -> Option<JointRole> {
        let normalized = normalize_joint_name(name);
        if let Some(role) = central_role(&normalized) {
            return Some(role);
        }
        let (side, base) = split_side(&normalized)?;
        let limb = limb_base(base)?;
        Some(limb.with_side(side))
    }
}

impl core::fmt::Display for JointRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone)]
enum Limb {
    Shoulder,
    UpperArm,
    LowerArm,
    Hand,
    UpperLeg,
    LowerLeg,
    Foot,
}

impl Limb {
    fn with_side(self, side: Side) -> JointRole {
        use JointRole::*;
        match (self, side) {
            (Limb::Shoulder, Side::Left) => LeftShoulder,
            (Limb::Shoulder, Side::Right) => RightShoulder,
            (Limb::UpperArm, Side::Left) => LeftUpperArm,
            (Limb::UpperArm, Side::Right) => RightUpperArm,
            (Limb::LowerArm, Side::Left) => LeftLowerArm,
            (Limb::LowerArm, Side::Right) => RightLowerArm,
            (Limb::Hand, Side::Left) => LeftHand,
            (Limb::Hand, Side::Right) => RightHand,
            (Limb::UpperLeg, Side::Left) => LeftUpperLeg,
            (Limb::UpperLeg, Side::Right) => RightUpperLeg,
            (Limb::LowerLeg, Side::Left) => LeftLowerLeg,
            (Limb::LowerLeg, Side::Right) => RightLowerLeg,
            (Limb::Foot, Side::Left) => LeftFoot,
            (Limb::Foot, Side::Right) => RightFoot,
        }
    }
}

fn central_role(normalized: &str) -> Option<JointRole> {
    match normalized {
        "hips" | "hip" | "pelvis" => Some(JointRole::Hips),
        "spine" | "spine0" | "abdomen" => Some(JointRole::Spine),
        "spine1" | "spine2" | "chest" | "upperchest" => Some(JointRole::Chest),
        "neck" | "neck1" => Some(JointRole::Neck),
        "head" => Some(JointRole::Head),
        _ => None,
    }
}

fn limb_base(base: &str) -> Option<Limb> {
    match base {
        "shoulder" | "clavicle" | "collar" => Some(Limb::Shoulder),
        "arm" | "upperarm" | "uparm" => Some(Limb::UpperArm),
        "forearm" | "lowerarm" | "elbow" => Some(Limb::LowerArm),
        "hand" | "wrist" => Some(Limb::Hand),
        "upleg" | "upperleg" | "thigh" => Some(Limb::UpperLeg),
        "leg" | "lowerleg" | "calf" | "shin" | "knee" => Some(Limb::LowerLeg),
        "foot" | "ankle" => Some(Limb::Foot),
        _ => None,
    }
}

fn split_side(normalized: &str) -> Option<(Side, &str)> {
    for (word, side) in [("left", Side::Left), ("right", Side::Right)] {
        if let Some(rest) = normalized.strip_prefix(word) {
            return Some((side, rest));
        }
        if let Some(rest) = normalized.strip_suffix(word) {
            return Some((side, rest));
        }
    }

    // Single-letter markers are only trusted when the remainder is a known limb.
    for (letter, side) in [('l', Side::Left), ('r', Side::Right)] {
        if let Some(rest) = normalized.strip_prefix(letter) {
            if limb_base(rest).is_some() {
                return Some((side, rest));
            }
        }
        if let Some(rest) = normalized.strip_suffix(letter) {
            if limb_base(rest).is_some() {
                return Some((side, rest));
            }
        }
    }

    None
}

/// Normalise a joint name for name-based matching.
///
/// Lowercases, drops namespace prefixes (`mixamorig:`, `Armature|`) and
/// removes every non-alphanumeric character.
pub fn normalize_joint_name(name: &str) -> String {
    let local = name.rsplit(|c: char| c == ':' || c == '|').next().unwrap_or(name);
    let local = local.strip_prefix("mixamorig").unwrap_or(local);
    local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A joint with its rest (bind) pose, relative to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub name: String,
    /// Index of the parent joint; parents always precede their children.
    pub parent: Option<usize>,
    /// Explicit role; when absent the role is inferred from the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<JointRole>,
    pub rest_translation: Vec3,
    pub rest_rotation: Quat,
}

impl Joint {
    pub fn new(name: impl Into<String>, parent: Option<usize>, rest_translation: Vec3) -> Self {
        Self {
            name: name.into(),
            parent,
            role: None,
            rest_translation,
            rest_rotation: Quat::IDENTITY,
        }
    }

    pub fn with_role(mut self, role: JointRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_rest_rotation(mut self, rotation: Quat) -> Self {
        self.rest_rotation = rotation;
        self
    }

    /// Explicit role, or the role inferred from the name.
    pub fn resolved_role(&self) -> Option<JointRole> {
        self.role.or_else(|| JointRole::infer(&self.name))
    }
}

/// A joint hierarchy in topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub joints: Vec<Joint>,
}

const UNIT_QUAT_TOLERANCE: f32 = 1e-3;

impl Skeleton {
    pub fn new(joints: Vec<Joint>) -> Self {
        Self { joints }
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Check structural soundness: non-empty, unique names, parents before
    /// children, finite transforms, unit rest rotations.
    pub fn validate(&self) -> Result<(), RetargetError> {
        if self.joints.is_empty() {
            return Err(RetargetError::MalformedSkeleton("skeleton has no joints".into()));
        }

        let mut names = HashSet::with_capacity(self.joints.len());
        for (idx, joint) in self.joints.iter().enumerate() {
            if joint.name.trim().is_empty() {
                return Err(RetargetError::MalformedSkeleton(format!("joint #{idx} has no name")));
            }
            if !names.insert(joint.name.as_str()) {
                return Err(RetargetError::MalformedSkeleton(format!(
                    "duplicate joint name '{}'",
                    joint.name
                )));
            }
            if let Some(parent) = joint.parent {
                if parent >= idx {
                    return Err(RetargetError::MalformedSkeleton(format!(
                        "joint '{}' references parent #{parent} which does not precede it",
                        joint.name
                    )));
                }
            }
            if !joint.rest_translation.is_finite() {
                return Err(RetargetError::MalformedSkeleton(format!(
                    "joint '{}' has a non-finite rest translation",
                    joint.name
                )));
            }
            if !joint.rest_rotation.is_finite()
                || (joint.rest_rotation.length() - 1.0).abs() > UNIT_QUAT_TOLERANCE
            {
                return Err(RetargetError::MalformedSkeleton(format!(
                    "joint '{}' has a non-unit rest rotation",
                    joint.name
                )));
            }
        }

        Ok(())
    }

    pub fn joint_index(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == name)
    }

    /// Index of the first joint carrying `role`.
    pub fn find_role(&self, role: JointRole) -> Option<usize> {
        self.joints.iter().position(|j| j.resolved_role() == Some(role))
    }

    /// Model-space position of a joint in the rest pose.
    pub fn rest_position(&self, index: usize) -> Vec3 {
        let mut chain = Vec::new();
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            chain.push(i);
            cursor = self.joints.get(i).and_then(|j| j.parent);
        }

        let mut position = Vec3::ZERO;
        let mut rotation = Quat::IDENTITY;
        for &i in chain.iter().rev() {
            let joint = &self.joints[i];
            position += rotation * joint.rest_translation;
            rotation *= joint.rest_rotation;
        }
        position
    }

    /// Rest height of the hips above the origin, if the rig has hips.
    pub fn hip_height(&self) -> Option<f32> {
        self.find_role(JointRole::Hips).map(|i| self.rest_position(i).y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_namespaced_names() {
        assert_eq!(normalize_joint_name("mixamorig:LeftUpLeg"), "leftupleg");
        assert_eq!(normalize_joint_name("Armature|upper_arm.R"), "upperarmr");
        assert_eq!(normalize_joint_name("L_Forearm"), "lforearm");
    }

    #[test]
    fn infers_roles_across_conventions() {
        assert_eq!(JointRole::infer("mixamorig:Hips"), Some(JointRole::Hips));
        assert_eq!(JointRole::infer("Spine1"), Some(JointRole::Chest));
        assert_eq!(JointRole::infer("LeftArm"), Some(JointRole::LeftUpperArm));
        assert_eq!(JointRole::infer("RightForeArm"), Some(JointRole::RightLowerArm));
        assert_eq!(JointRole::infer("l_upperarm"), Some(JointRole::LeftUpperArm));
        assert_eq!(JointRole::infer("upper_arm.R"), Some(JointRole::RightUpperArm));
        assert_eq!(JointRole::infer("thigh_l"), Some(JointRole::LeftUpperLeg));
        assert_eq!(JointRole::infer("RightLeg"), Some(JointRole::RightLowerLeg));
        assert_eq!(JointRole::infer("LeftHandIndex1"), None);
        assert_eq!(JointRole::infer("lowerarm"), None);
        assert_eq!(JointRole::infer("tail_03"), None);
    }

    #[test]
    fn explicit_role_wins_over_name() {
        let joint = Joint::new("bone_07", None, Vec3::ZERO).with_role(JointRole::Head);
        assert_eq!(joint.resolved_role(), Some(JointRole::Head));
    }

    #[test]
    fn rest_position_accumulates_parent_transforms() {
        let skeleton = Skeleton::new(vec![
            Joint::new("Hips", None, Vec3::new(0.0, 1.0, 0.0)),
            Joint::new("Spine", Some(0), Vec3::new(0.0, 0.5, 0.0)),
        ]);
        assert_eq!(skeleton.rest_position(1), Vec3::new(0.0, 1.5, 0.0));
        assert_eq!(skeleton.hip_height(), Some(1.0));
    }

    #[test]
    fn rejects_parent_after_child() {
        let skeleton = Skeleton::new(vec![
            Joint::new("Hips", Some(1), Vec3::ZERO),
            Joint::new("Spine", None, Vec3::ZERO),
        ]);
        assert!(matches!(
            skeleton.validate(),
            Err(RetargetError::MalformedSkeleton(msg)) if msg.contains("does not precede")
        ));
    }

    #[test]
    fn rejects_duplicate_names_and_empty_rigs() {
        let dup = Skeleton::new(vec![
            Joint::new("Hips", None, Vec3::ZERO),
            Joint::new("Hips", Some(0), Vec3::ZERO),
        ]);
        assert!(dup.validate().is_err());
        assert!(Skeleton::new(Vec::new()).validate().is_err());
    }

    #[test]
    fn rejects_non_unit_rest_rotation() {
        let skeleton = Skeleton::new(vec![
            Joint::new("Hips", None, Vec3::ZERO).with_rest_rotation(Quat::from_xyzw(0.0, 0.0, 0.0, 2.0)),
        ]);
        assert!(skeleton.validate().is_err());
    }
}
