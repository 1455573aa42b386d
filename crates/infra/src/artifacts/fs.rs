//! Filesystem artifact store.
//!
//! Layout: `<root>/<first two hex chars>/<hash>` for content and a
//! `<hash>.json` sidecar holding kind, size and store time. Pins live in
//! memory only; they track live jobs of this process.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ArtifactError, ArtifactKind, ArtifactMeta, ArtifactRef, ArtifactStore, verify};

#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    index: RwLock<HashMap<ArtifactRef, ArtifactMeta>>,
}

impl FsArtifactStore {
    /// Open (or create) a store under `root`, indexing existing artifacts.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut index = HashMap::new();
        for shard in fs::read_dir(&root)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&shard)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match load_sidecar(&path) {
                    Ok(meta) if blob_path(&root, &meta.reference).exists() => {
                        index.insert(meta.reference.clone(), meta);
                    }
                    Ok(meta) => warn!(artifact = %meta.reference, "sidecar without content, skipping"),
                    Err(err) => warn!(path = %path.display(), error = %err, "unreadable sidecar"),
                }
            }
        }

        debug!(root = %root.display(), artifacts = index.len(), "opened artifact store");
        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_sidecar(&self, meta: &ArtifactMeta) -> Result<(), ArtifactError> {
        let json = serde_json::to_vec_pretty(meta).map_err(|e| ArtifactError::Storage(e.to_string()))?;
        write_atomic(&sidecar_path(&self.root, &meta.reference), &json)
    }
}

fn shard_dir(root: &Path, reference: &ArtifactRef) -> PathBuf {
    root.join(&reference.as_str()[..2])
}

fn blob_path(root: &Path, reference: &ArtifactRef) -> PathBuf {
    shard_dir(root, reference).join(reference.as_str())
}

fn sidecar_path(root: &Path, reference: &ArtifactRef) -> PathBuf {
    shard_dir(root, reference).join(format!("{}.json", reference.as_str()))
}

fn load_sidecar(path: &Path) -> Result<ArtifactMeta, ArtifactError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Storage(e.to_string()))
}

/// Write through a temporary file in the same directory, then rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let dir = path
        .parent()
        .ok_or_else(|| ArtifactError::Storage(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".tmp-{}", Uuid::now_v7()));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ArtifactStore for FsArtifactStore {
    fn put(
        &self,
        bytes: &[u8],
        content_hash: &str,
        kind: ArtifactKind,
    ) -> Result<ArtifactRef, ArtifactError> {
        let reference = verify(bytes, content_hash)?;
        let mut index = self.index.write().unwrap();

        if let Some(meta) = index.get_mut(&reference) {
            meta.refresh(kind);
            let meta = meta.clone();
            self.write_sidecar(&meta)?;
            return Ok(reference);
        }

        write_atomic(&blob_path(&self.root, &reference), bytes)?;
        let meta = ArtifactMeta::new(reference.clone(), kind, bytes.len() as u64);
        self.write_sidecar(&meta)?;
        index.insert(reference.clone(), meta);
        debug!(artifact = %reference, size = bytes.len(), ?kind, "stored artifact");
        Ok(reference)
    }

    fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        if !self.index.read().unwrap().contains_key(reference) {
            return Err(ArtifactError::NotFound(reference.clone()));
        }
        match fs::read(blob_path(&self.root, reference)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(reference.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn meta(&self, reference: &ArtifactRef) -> Result<ArtifactMeta, ArtifactError> {
        self.index
            .read()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(reference.clone()))
    }

    fn pin(&self, reference: &ArtifactRef) -> Result<(), ArtifactError> {
        let mut index = self.index.write().unwrap();
        let meta = index
            .get_mut(reference)
            .ok_or_else(|| ArtifactError::NotFound(reference.clone()))?;
        meta.pins += 1;
        Ok(())
    }

    fn unpin(&self, reference: &ArtifactRef) -> Result<(), ArtifactError> {
        let mut index = self.index.write().unwrap();
        let meta = index
            .get_mut(reference)
            .ok_or_else(|| ArtifactError::NotFound(reference.clone()))?;
        meta.pins = meta.pins.saturating_sub(1);
        Ok(())
    }

    fn remove(&self, reference: &ArtifactRef) -> Result<(), ArtifactError> {
        let mut index = self.index.write().unwrap();
        match index.get(reference) {
            None => return Err(ArtifactError::NotFound(reference.clone())),
            Some(meta) if meta.pins > 0 => return Err(ArtifactError::Pinned(reference.clone())),
            Some(_) => {}
        }
        index.remove(reference);
        remove_files(&self.root, reference)
    }

    fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<ArtifactRef>, ArtifactError> {
        let mut index = self.index.write().unwrap();
        let expired: Vec<ArtifactRef> = index
            .values()
            .filter(|m| m.is_expired(now, ttl))
            .map(|m| m.reference.clone())
            .collect();

        for reference in &expired {
            index.remove(reference);
            if let Err(err) = remove_files(&self.root, reference) {
                warn!(artifact = %reference, error = %err, "failed to delete swept artifact");
            } else {
                debug!(artifact = %reference, "swept expired output");
            }
        }
        Ok(expired)
    }
}

fn remove_files(root: &Path, reference: &ArtifactRef) -> Result<(), ArtifactError> {
    for path in [blob_path(root, reference), sidecar_path(root, reference)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::sha256_hex;

    #[test]
    fn stores_content_in_sharded_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();
        let r = store.put(b"mesh", &sha256_hex(b"mesh"), ArtifactKind::Source).unwrap();

        let expected = dir.path().join(&r.as_str()[..2]).join(r.as_str());
        assert!(expected.exists());
        assert_eq!(store.get(&r).unwrap(), b"mesh");
        assert_eq!(store.meta(&r).unwrap().size, 4);
    }

    #[test]
    fn reopening_recovers_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let r = {
            let store = FsArtifactStore::open(dir.path()).unwrap();
            store.put_bytes(b"clip", ArtifactKind::Source).unwrap()
        };

        let reopened = FsArtifactStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&r).unwrap(), b"clip");
        let meta = reopened.meta(&r).unwrap();
        assert_eq!(meta.kind, ArtifactKind::Source);
        assert_eq!(meta.pins, 0);
    }

    #[test]
    fn rejects_wrong_hash_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();
        assert!(store
            .put(b"mesh", &sha256_hex(b"nope"), ArtifactKind::Source)
            .is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn sweep_deletes_expired_output_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();
        let out = store.put_bytes(b"baked", ArtifactKind::Output).unwrap();
        let pinned = store.put_bytes(b"baked-2", ArtifactKind::Output).unwrap();
        store.pin(&pinned).unwrap();

        let later = Utc::now() + chrono::Duration::hours(1);
        let swept = store.sweep(later, Duration::from_secs(60)).unwrap();
        assert_eq!(swept, vec![out.clone()]);
        assert!(!dir.path().join(&out.as_str()[..2]).join(out.as_str()).exists());
        assert!(matches!(store.get(&out), Err(ArtifactError::NotFound(_))));
        assert!(store.get(&pinned).is_ok());
    }

    #[test]
    fn remove_respects_pins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();
        let r = store.put_bytes(b"mesh", ArtifactKind::Source).unwrap();
        store.pin(&r).unwrap();
        assert_eq!(store.remove(&r), Err(ArtifactError::Pinned(r.clone())));
        store.unpin(&r).unwrap();
        store.remove(&r).unwrap();
        assert!(!store.contains(&r));
    }
}
