//! Content-addressed artifact storage.
//!
//! Artifacts are addressed by the SHA-256 hex digest of their bytes, so
//! identical uploads collapse into one entry. Outputs become eligible for
//! deletion after a TTL unless pinned by a live job.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod fs;
pub mod memory;
pub mod upload;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;
pub use upload::{SourceKind, ingest_source, validate_upload};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Reference to a stored artifact: its lowercase SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn parse(hash: &str) -> Result<Self, ArtifactError> {
        let hash = hash.trim().to_ascii_lowercase();
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ArtifactError::InvalidHash(hash));
        }
        Ok(Self(hash))
    }

    pub fn of(bytes: &[u8]) -> Self {
        Self(sha256_hex(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Externally provided mesh or clip; never swept.
    Source,
    /// Pipeline output; swept after its TTL unless pinned.
    Output,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub reference: ArtifactRef,
    pub kind: ArtifactKind,
    pub size: u64,
    /// Time of the latest `put`; re-putting an existing artifact refreshes it.
    pub stored_at: DateTime<Utc>,
    #[serde(skip)]
    pub pins: usize,
}

impl ArtifactMeta {
    fn new(reference: ArtifactRef, kind: ArtifactKind, size: u64) -> Self {
        Self {
            reference,
            kind,
            size,
            stored_at: Utc::now(),
            pins: 0,
        }
    }

    /// A source stays a source even if the same bytes are later put as output.
    fn refresh(&mut self, kind: ArtifactKind) {
        self.stored_at = Utc::now();
        if kind == ArtifactKind::Source {
            self.kind = ArtifactKind::Source;
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        self.kind == ArtifactKind::Output
            && self.pins == 0
            && self
                .stored_at
                .checked_add_signed(ttl)
                .is_some_and(|expiry| expiry <= now)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArtifactError {
    #[error("content hash mismatch: declared {declared}, actual {actual}")]
    HashMismatch { declared: String, actual: String },
    #[error("invalid content hash: {0:?}")]
    InvalidHash(String),
    #[error("artifact not found: {0}")]
    NotFound(ArtifactRef),
    #[error("artifact {0} is pinned by a live job")]
    Pinned(ArtifactRef),
    #[error("upload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },
    #[error("unsupported file type {extension:?}; allowed: {allowed}")]
    UnsupportedExtension { extension: String, allowed: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        ArtifactError::Storage(err.to_string())
    }
}

/// Verify `bytes` against the declared hash and return their reference.
pub(crate) fn verify(bytes: &[u8], content_hash: &str) -> Result<ArtifactRef, ArtifactError> {
    let declared = ArtifactRef::parse(content_hash)?;
    let actual = ArtifactRef::of(bytes);
    if declared != actual {
        return Err(ArtifactError::HashMismatch {
            declared: declared.0,
            actual: actual.0,
        });
    }
    Ok(actual)
}

/// Content-addressed blob store with reference pinning.
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under `content_hash`. Idempotent: identical content
    /// resolves to the same reference. Fails if the hash does not match.
    fn put(
        &self,
        bytes: &[u8],
        content_hash: &str,
        kind: ArtifactKind,
    ) -> Result<ArtifactRef, ArtifactError>;

    fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ArtifactError>;

    fn meta(&self, reference: &ArtifactRef) -> Result<ArtifactMeta, ArtifactError>;

    /// Protect an artifact from `remove` and `sweep`. Pins are counted.
    fn pin(&self, reference: &ArtifactRef) -> Result<(), ArtifactError>;

    fn unpin(&self, reference: &ArtifactRef) -> Result<(), ArtifactError>;

    /// Delete an unpinned artifact.
    fn remove(&self, reference: &ArtifactRef) -> Result<(), ArtifactError>;

    /// Delete every unpinned output stored more than `ttl` before `now`.
    fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<ArtifactRef>, ArtifactError>;

    fn contains(&self, reference: &ArtifactRef) -> bool {
        self.meta(reference).is_ok()
    }

    /// `put` with the hash computed locally.
    fn put_bytes(&self, bytes: &[u8], kind: ArtifactKind) -> Result<ArtifactRef, ArtifactError> {
        self.put(bytes, &sha256_hex(bytes), kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn reference_parsing_normalises_case() {
        let upper = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855";
        assert_eq!(ArtifactRef::parse(upper).unwrap(), ArtifactRef::of(b""));
        assert!(ArtifactRef::parse("abc").is_err());
        assert!(ArtifactRef::parse(&"z".repeat(64)).is_err());
    }

    #[test]
    fn verify_rejects_mismatched_hash() {
        let err = verify(b"mesh", &sha256_hex(b"other")).unwrap_err();
        assert!(matches!(err, ArtifactError::HashMismatch { .. }));
    }

    #[test]
    fn only_unpinned_outputs_expire() {
        let now = Utc::now();
        let ttl = Duration::from_secs(60);
        let mut meta = ArtifactMeta::new(ArtifactRef::of(b"x"), ArtifactKind::Output, 1);
        meta.stored_at = now - chrono::Duration::seconds(61);
        assert!(meta.is_expired(now, ttl));

        meta.pins = 1;
        assert!(!meta.is_expired(now, ttl));

        meta.pins = 0;
        meta.kind = ArtifactKind::Source;
        assert!(!meta.is_expired(now, ttl));
    }
}
