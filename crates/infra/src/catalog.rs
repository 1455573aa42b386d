//! Read-only view of the externally owned character/animation catalog.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use animforge_core::{AssetId, CallerId};
use animforge_retarget::{Skeleton, presets};

use crate::artifacts::{ArtifactError, ArtifactRef, ArtifactStore, SourceKind, ingest_source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharacterKind {
    Humanoid,
    Creature,
    Robot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterAsset {
    pub id: AssetId,
    pub name: String,
    pub kind: CharacterKind,
    pub skeleton: Skeleton,
    pub mesh_ref: ArtifactRef,
    pub polygons: u32,
    pub tags: Vec<String>,
    pub owner: Option<CallerId>,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationAsset {
    pub id: AssetId,
    pub name: String,
    pub category: String,
    pub duration_secs: f32,
    pub clip_ref: ArtifactRef,
    pub tags: Vec<String>,
    pub owner: Option<CallerId>,
    pub is_public: bool,
}

fn visible(is_public: bool, owner: Option<&CallerId>, caller: &CallerId) -> bool {
    is_public || owner == Some(caller)
}

impl CharacterAsset {
    pub fn visible_to(&self, caller: &CallerId) -> bool {
        visible(self.is_public, self.owner.as_ref(), caller)
    }
}

impl AnimationAsset {
    pub fn visible_to(&self, caller: &CallerId) -> bool {
        visible(self.is_public, self.owner.as_ref(), caller)
    }
}

/// Lookup of catalog assets by id.
pub trait AssetCatalog: Send + Sync {
    fn character(&self, id: &AssetId) -> Option<CharacterAsset>;
    fn animation(&self, id: &AssetId) -> Option<AnimationAsset>;
}

#[derive(Debug, Default)]
pub struct InMemoryAssetCatalog {
    characters: RwLock<HashMap<AssetId, CharacterAsset>>,
    animations: RwLock<HashMap<AssetId, AnimationAsset>>,
}

impl InMemoryAssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_character(&self, asset: CharacterAsset) {
        self.characters.write().unwrap().insert(asset.id.clone(), asset);
    }

    pub fn insert_animation(&self, asset: AnimationAsset) {
        self.animations.write().unwrap().insert(asset.id.clone(), asset);
    }
}

impl AssetCatalog for InMemoryAssetCatalog {
    fn character(&self, id: &AssetId) -> Option<CharacterAsset> {
        self.characters.read().unwrap().get(id).cloned()
    }

    fn animation(&self, id: &AssetId) -> Option<AnimationAsset> {
        self.animations.read().unwrap().get(id).cloned()
    }
}

const DEMO_CHARACTERS: &[(&str, CharacterKind, f32, u32, &[&str])] = &[
    ("Kaya", CharacterKind::Humanoid, 0.95, 15_482, &["female", "casual", "modern"]),
    ("Malcolm", CharacterKind::Humanoid, 1.05, 18_672, &["male", "business", "formal"]),
    ("Remy", CharacterKind::Humanoid, 0.92, 14_235, &["female", "athletic", "sports"]),
    ("Jasmine", CharacterKind::Humanoid, 0.97, 16_789, &["female", "elegant", "dress"]),
    ("Mutant", CharacterKind::Creature, 1.4, 28_421, &["creature", "fantasy", "monster"]),
];

const DEMO_ANIMATIONS: &[(&str, &str, f32, f32, &[&str])] = &[
    ("Idle", "Basic", 2.5, 0.05, &["basic", "loop", "standing"]),
    ("Walking", "Locomotion", 1.2, 0.5, &["locomotion", "cycle", "walking"]),
    ("Running", "Locomotion", 0.8, 0.9, &["locomotion", "cycle", "running", "fast"]),
    ("Jumping", "Action", 1.5, 0.7, &["action", "jump", "landing"]),
    ("Dancing", "Entertainment", 4.2, 0.6, &["entertainment", "dance", "rhythm"]),
];

const SERPENT_TAGS: &[&str] = &["creature", "reptile"];

const DEMO_FRAME_RATE: f32 = 30.0;

/// Populate `catalog` with the public demo characters and animations, storing
/// their source artifacts in `store`. Asset ids equal the display names.
///
/// Also registers `Serpent`, a limbless creature no humanoid clip can drive.
pub fn seed_demo_catalog(
    catalog: &InMemoryAssetCatalog,
    store: &dyn ArtifactStore,
) -> Result<(), ArtifactError> {
    let clip_rig = presets::mocap_rig();
    for &(name, category, duration, stride, tags) in DEMO_ANIMATIONS {
        let clip = presets::locomotion_clip(name, &clip_rig, duration, DEMO_FRAME_RATE, stride);
        let bytes = clip
            .to_json()
            .map_err(|e| ArtifactError::Storage(e.to_string()))?;
        let clip_ref = ingest_source(store, &format!("{name}.json"), &bytes, SourceKind::Clip)?;
        catalog.insert_animation(AnimationAsset {
            id: demo_id(name)?,
            name: name.to_string(),
            category: category.to_string(),
            duration_secs: duration,
            clip_ref,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            owner: None,
            is_public: true,
        });
    }

    let characters = DEMO_CHARACTERS
        .iter()
        .map(|&(name, kind, scale, polygons, tags)| {
            (name, kind, presets::humanoid_rig("mixamorig:", scale), polygons, tags)
        })
        .chain(std::iter::once((
            "Serpent",
            CharacterKind::Creature,
            presets::serpent_rig(),
            9_120,
            SERPENT_TAGS,
        )));

    for (name, kind, skeleton, polygons, tags) in characters {
        let mesh = format!("demo mesh: {name} ({polygons} polygons)");
        let mesh_ref = ingest_source(store, &format!("{name}.fbx"), mesh.as_bytes(), SourceKind::Mesh)?;
        catalog.insert_character(CharacterAsset {
            id: demo_id(name)?,
            name: name.to_string(),
            kind,
            skeleton,
            mesh_ref,
            polygons,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            owner: None,
            is_public: true,
        });
    }

    Ok(())
}

fn demo_id(name: &str) -> Result<AssetId, ArtifactError> {
    AssetId::parse(name).map_err(|e| ArtifactError::Storage(e.to_string()))
}
