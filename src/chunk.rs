//! Chunk sources.
//!
//! A chunk source turns an asset identity and an optional requested length
//! into the bytes sent back on a `request_chunk` stream. Sources are pure and
//! infallible: every identity and length resolves to some byte sequence.
//!
//! The only implementation here serves a single known asset with a fixed
//! payload and answers everything else with a bounded zero-filled stub. A
//! content-addressed store can replace it behind the same trait without
//! touching the stream dispatcher.

use bytes::Bytes;
use serde::Deserialize;

/// Size of the payload served for the known asset (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Byte value the known asset's payload is filled with
pub const CHUNK_FILL: u8 = 0xAB;

/// Upper bound (and default) for stub responses
pub const STUB_MAX_LEN: usize = 4096;

const DEFAULT_MODEL_ID: &str = "runwayml/stable-diffusion-v1-5";
const DEFAULT_REV: &str = "abc123";

static ZEROES: [u8; STUB_MAX_LEN] = [0; STUB_MAX_LEN];

/// A `(model_id, rev)` pair naming one revision of an asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetIdentity {
    pub model_id: String,
    pub rev: String,
}

impl AssetIdentity {
    pub fn new(model_id: impl Into<String>, rev: impl Into<String>) -> Self {
        AssetIdentity {
            model_id: model_id.into(),
            rev: rev.into(),
        }
    }
}

impl Default for AssetIdentity {
    fn default() -> Self {
        AssetIdentity::new(DEFAULT_MODEL_ID, DEFAULT_REV)
    }
}

impl std::fmt::Display for AssetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.model_id, self.rev)
    }
}

/// Resolves asset identities to response bytes.
pub trait ChunkSource: Send + Sync {
    /// Return the bytes to send for `identity`.
    ///
    /// `requested_len` is the peer's `length` field, if it sent one.
    fn resolve(&self, identity: &AssetIdentity, requested_len: Option<u64>) -> Bytes;
}

/// Serves one known asset with a fixed payload.
///
/// The payload buffer is allocated once and shared by every stream; cloning
/// `Bytes` only bumps a reference count.
#[derive(Debug, Clone)]
pub struct FixedAssetSource {
    known: AssetIdentity,
    payload: Bytes,
}

impl FixedAssetSource {
    pub fn new(known: AssetIdentity) -> Self {
        FixedAssetSource {
            known,
            payload: Bytes::from(vec![CHUNK_FILL; CHUNK_SIZE]),
        }
    }

    pub fn known(&self) -> &AssetIdentity {
        &self.known
    }
}

impl Default for FixedAssetSource {
    fn default() -> Self {
        FixedAssetSource::new(AssetIdentity::default())
    }
}

impl ChunkSource for FixedAssetSource {
    fn resolve(&self, identity: &AssetIdentity, requested_len: Option<u64>) -> Bytes {
        if *identity == self.known {
            return self.payload.clone();
        }

        Bytes::from_static(&ZEROES[..stub_len(requested_len)])
    }
}

/// Length of a stub response: the requested length clamped to `STUB_MAX_LEN`
fn stub_len(requested_len: Option<u64>) -> usize {
    match requested_len {
        Some(len) => usize::try_from(len).map_or(STUB_MAX_LEN, |len| len.min(STUB_MAX_LEN)),
        None => STUB_MAX_LEN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stranger() -> AssetIdentity {
        AssetIdentity::new("x", "y")
    }

    #[test]
    fn test_known_asset_gets_full_payload() {
        let source = FixedAssetSource::default();
        let chunk = source.resolve(&AssetIdentity::default(), None);
        assert_eq!(chunk.len(), CHUNK_SIZE);
        assert!(chunk.iter().all(|&b| b == CHUNK_FILL));
    }

    #[test]
    fn test_known_asset_ignores_length() {
        let source = FixedAssetSource::default();
        let chunk = source.resolve(&AssetIdentity::default(), Some(10));
        assert_eq!(chunk.len(), CHUNK_SIZE);
    }

    #[test]
    fn test_stub_uses_requested_length() {
        let source = FixedAssetSource::default();
        let chunk = source.resolve(&stranger(), Some(100));
        assert_eq!(chunk.len(), 100);
        assert!(chunk.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_stub_is_clamped() {
        let source = FixedAssetSource::default();
        assert_eq!(source.resolve(&stranger(), Some(999_999)).len(), STUB_MAX_LEN);
        assert_eq!(source.resolve(&stranger(), Some(u64::MAX)).len(), STUB_MAX_LEN);
    }

    #[test]
    fn test_stub_defaults_to_max() {
        let source = FixedAssetSource::default();
        let chunk = source.resolve(&stranger(), None);
        assert_eq!(chunk.len(), STUB_MAX_LEN);
        assert!(chunk.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_length_stub() {
        let source = FixedAssetSource::default();
        assert!(source.resolve(&stranger(), Some(0)).is_empty());
    }

    #[test]
    fn test_identity_must_match_exactly() {
        let source = FixedAssetSource::default();
        let wrong_rev = AssetIdentity::new("runwayml/stable-diffusion-v1-5", "abc124");
        assert_eq!(source.resolve(&wrong_rev, None).len(), STUB_MAX_LEN);
    }

    #[test]
    fn test_configured_identity() {
        let source = FixedAssetSource::new(AssetIdentity::new("org/model", "main"));
        assert_eq!(source.known().to_string(), "org/model@main");
        assert_eq!(
            source.resolve(&AssetIdentity::new("org/model", "main"), None).len(),
            CHUNK_SIZE
        );
        assert_eq!(source.resolve(&AssetIdentity::default(), None).len(), STUB_MAX_LEN);
    }

    #[test]
    fn test_payload_is_shared() {
        let source = FixedAssetSource::default();
        let a = source.resolve(&AssetIdentity::default(), None);
        let b = source.resolve(&AssetIdentity::default(), None);
        assert_eq!(a.as_ptr(), b.as_ptr());
    }
}
