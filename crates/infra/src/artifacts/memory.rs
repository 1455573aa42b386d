//! In-memory artifact store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{ArtifactError, ArtifactKind, ArtifactMeta, ArtifactRef, ArtifactStore, verify};

#[derive(Debug)]
struct Stored {
    bytes: Arc<[u8]>,
    meta: ArtifactMeta,
}

#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    entries: RwLock<HashMap<ArtifactRef, Stored>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(
        &self,
        bytes: &[u8],
        content_hash: &str,
        kind: ArtifactKind,
    ) -> Result<ArtifactRef, ArtifactError> {
        let reference = verify(bytes, content_hash)?;
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(&reference) {
            Some(existing) => existing.meta.refresh(kind),
            None => {
                entries.insert(
                    reference.clone(),
                    Stored {
                        bytes: Arc::from(bytes),
                        meta: ArtifactMeta::new(reference.clone(), kind, bytes.len() as u64),
                    },
                );
            }
        }
        Ok(reference)
    }

    fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        let entries = self.entries.read().unwrap();
        entries
            .get(reference)
            .map(|s| s.bytes.to_vec())
            .ok_or_else(|| ArtifactError::NotFound(reference.clone()))
    }

    fn meta(&self, reference: &ArtifactRef) -> Result<ArtifactMeta, ArtifactError> {
        let entries = self.entries.read().unwrap();
        entries
            .get(reference)
            .map(|s| s.meta.clone())
            .ok_or_else(|| ArtifactError::NotFound(reference.clone()))
    }

    fn pin(&self, reference: &ArtifactRef) -> Result<(), ArtifactError> {
        let mut entries = self.entries.write().unwrap();
        let stored = entries
            .get_mut(reference)
            .ok_or_else(|| ArtifactError::NotFound(reference.clone()))?;
        stored.meta.pins += 1;
        Ok(())
    }

    fn unpin(&self, reference: &ArtifactRef) -> Result<(), ArtifactError> {
        let mut entries = self.entries.write().unwrap();
        let stored = entries
            .get_mut(reference)
            .ok_or_else(|| ArtifactError::NotFound(reference.clone()))?;
        stored.meta.pins = stored.meta.pins.saturating_sub(1);
        Ok(())
    }

    fn remove(&self, reference: &ArtifactRef) -> Result<(), ArtifactError> {
        let mut entries = self.entries.write().unwrap();
        match entries.get(reference) {
            None => Err(ArtifactError::NotFound(reference.clone())),
            Some(stored) if stored.meta.pins > 0 => Err(ArtifactError::Pinned(reference.clone())),
            Some(_) => {
                entries.remove(reference);
                Ok(())
            }
        }
    }

    fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<ArtifactRef>, ArtifactError> {
        let mut entries = self.entries.write().unwrap();
        let expired: Vec<ArtifactRef> = entries
            .values()
            .filter(|s| s.meta.is_expired(now, ttl))
            .map(|s| s.meta.reference.clone())
            .collect();
        for reference in &expired {
            entries.remove(reference);
            debug!(artifact = %reference, "swept expired output");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::sha256_hex;

    #[test]
    fn put_is_idempotent_by_content() {
        let store = InMemoryArtifactStore::new();
        let a = store.put(b"mesh", &sha256_hex(b"mesh"), ArtifactKind::Source).unwrap();
        let b = store.put_bytes(b"mesh", ArtifactKind::Source).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a).unwrap(), b"mesh");
    }

    #[test]
    fn put_rejects_wrong_hash() {
        let store = InMemoryArtifactStore::new();
        let err = store
            .put(b"mesh", &sha256_hex(b"clip"), ArtifactKind::Source)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::HashMismatch { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = InMemoryArtifactStore::new();
        let missing = ArtifactRef::of(b"nothing");
        assert_eq!(store.get(&missing), Err(ArtifactError::NotFound(missing.clone())));
        assert!(!store.contains(&missing));
    }

    #[test]
    fn pinned_artifacts_survive_remove_and_sweep() {
        let store = InMemoryArtifactStore::new();
        let out = store.put_bytes(b"baked", ArtifactKind::Output).unwrap();
        store.pin(&out).unwrap();
        store.pin(&out).unwrap();

        assert_eq!(store.remove(&out), Err(ArtifactError::Pinned(out.clone())));
        let later = Utc::now() + chrono::Duration::hours(48);
        assert!(store.sweep(later, Duration::from_secs(60)).unwrap().is_empty());

        store.unpin(&out).unwrap();
        assert!(store.sweep(later, Duration::from_secs(60)).unwrap().is_empty());

        store.unpin(&out).unwrap();
        assert_eq!(store.sweep(later, Duration::from_secs(60)).unwrap(), vec![out.clone()]);
        assert!(!store.contains(&out));
    }

    #[test]
    fn sweep_leaves_sources_and_fresh_outputs() {
        let store = InMemoryArtifactStore::new();
        let src = store.put_bytes(b"clip", ArtifactKind::Source).unwrap();
        let out = store.put_bytes(b"baked", ArtifactKind::Output).unwrap();

        assert!(store.sweep(Utc::now(), Duration::from_secs(3600)).unwrap().is_empty());
        let swept = store
            .sweep(Utc::now() + chrono::Duration::hours(2), Duration::from_secs(3600))
            .unwrap();
        assert_eq!(swept, vec![out]);
        assert!(store.contains(&src));
    }
}
