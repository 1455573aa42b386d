//! Validation of externally supplied source files.

use std::path::Path;

use tracing::info;

use super::{ArtifactError, ArtifactKind, ArtifactRef, ArtifactStore};

pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

pub const MESH_EXTENSIONS: &[&str] = &["fbx", "obj", "dae", "gltf", "glb"];
/// `json` is the native clip encoding the engine decodes.
pub const CLIP_EXTENSIONS: &[&str] = &["fbx", "bvh", "anim", "json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Mesh,
    Clip,
}

impl SourceKind {
    pub fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            SourceKind::Mesh => MESH_EXTENSIONS,
            SourceKind::Clip => CLIP_EXTENSIONS,
        }
    }
}

/// Check a source file's name and size against the upload limits.
pub fn validate_upload(filename: &str, size: u64, kind: SourceKind) -> Result<(), ArtifactError> {
    if size > MAX_UPLOAD_BYTES {
        return Err(ArtifactError::TooLarge {
            size,
            max: MAX_UPLOAD_BYTES,
        });
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let allowed = kind.allowed_extensions();
    if !allowed.contains(&extension.as_str()) {
        return Err(ArtifactError::UnsupportedExtension {
            extension,
            allowed: allowed
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", "),
        });
    }
    Ok(())
}

/// Validate and store a source file.
pub fn ingest_source(
    store: &dyn ArtifactStore,
    filename: &str,
    bytes: &[u8],
    kind: SourceKind,
) -> Result<ArtifactRef, ArtifactError> {
    validate_upload(filename, bytes.len() as u64, kind)?;
    let reference = store.put_bytes(bytes, ArtifactKind::Source)?;
    info!(artifact = %reference, filename, size = bytes.len(), ?kind, "ingested source");
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;

    #[test]
    fn accepts_known_extensions_case_insensitively() {
        assert!(validate_upload("Kaya.FBX", 10, SourceKind::Mesh).is_ok());
        assert!(validate_upload("kaya.glb", 10, SourceKind::Mesh).is_ok());
        assert!(validate_upload("walk.bvh", 10, SourceKind::Clip).is_ok());
        assert!(validate_upload("walk.json", 10, SourceKind::Clip).is_ok());
    }

    #[test]
    fn rejects_wrong_type_for_kind() {
        let err = validate_upload("walk.bvh", 10, SourceKind::Mesh).unwrap_err();
        match err {
            ArtifactError::UnsupportedExtension { extension, allowed } => {
                assert_eq!(extension, "bvh");
                assert!(allowed.contains(".glb"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(validate_upload("README", 10, SourceKind::Clip).is_err());
    }

    #[test]
    fn rejects_oversized_files() {
        assert!(validate_upload("big.fbx", MAX_UPLOAD_BYTES, SourceKind::Mesh).is_ok());
        assert!(matches!(
            validate_upload("big.fbx", MAX_UPLOAD_BYTES + 1, SourceKind::Mesh),
            Err(ArtifactError::TooLarge { .. })
        ));
    }

    #[test]
    fn ingest_stores_valid_sources() {
        let store = InMemoryArtifactStore::new();
        let r = ingest_source(&store, "kaya.fbx", b"mesh bytes", SourceKind::Mesh).unwrap();
        assert_eq!(store.meta(&r).unwrap().kind, ArtifactKind::Source);
        assert!(ingest_source(&store, "kaya.txt", b"x", SourceKind::Mesh).is_err());
        assert_eq!(store.len(), 1);
    }
}
