//! Stash item references.
//!
//! A reference is the object name `<prefix>/<uuid4>` of one item inside the
//! tenant container. It is the only link between a caller's metadata and the
//! stored blob; there is no reverse index, so losing a reference orphans the
//! blob.
//!
//! The backend cannot create-if-absent, so allocation checks for an existing
//! object and redraws on collision. This is a bounded, best-effort guard
//! against a broken RNG rather than a lock: a concurrent writer can still
//! race between the check and the write.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::CryptoError;
use crate::store::{self, ObjectStore};

/// The only item metadata version understood by this crate.
pub const METADATA_VERSION: u32 = 1;

/// The object name of one stash item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StashItemRef(String);

impl StashItemRef {
    /// Accept an existing reference if it sits directly under `prefix`.
    pub fn parse(prefix: &str, raw: &str) -> Result<Self, CryptoError> {
        let tail = raw
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| CryptoError::InvalidMetadata(format!("ref outside stash: {}", raw)))?;

        if tail.is_empty() || tail.contains('/') {
            return Err(CryptoError::InvalidMetadata(format!("malformed ref: {}", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn generate(prefix: &str) -> Self {
        Self(format!("{}/{}", prefix, Uuid::new_v4()))
    }
}

impl fmt::Display for StashItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocate a reference under `prefix` that does not yet exist in `container`.
///
/// Draws at most `attempts` UUIDs. Fails with `ReferenceExhausted` once every
/// draw has collided.
pub fn allocate<S: ObjectStore + ?Sized>(
    store: &S,
    container: &str,
    prefix: &str,
    attempts: u32,
) -> Result<StashItemRef, CryptoError> {
    for attempt in 1..=attempts {
        let candidate = StashItemRef::generate(prefix);
        let taken = store
            .exists(container, candidate.as_str())
            .map_err(|e| store::storage_fault(container, candidate.as_str(), "exists", e))?;

        if !taken {
            debug!(reference = %candidate, attempt, "allocated stash reference");
            return Ok(candidate);
        }
        warn!(reference = %candidate, attempt, "stash reference collision");
    }
    Err(CryptoError::ReferenceExhausted)
}

/// The persisted linkage `{"version": 1, "ref": "<prefix>/<uuid>"}` between
/// a logical item and its blob. Stored by the caller, not by the stash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub version: u32,
    #[serde(rename = "ref")]
    pub reference: String,
}

impl ItemMetadata {
    pub fn new(reference: &StashItemRef) -> Self {
        Self {
            version: METADATA_VERSION,
            reference: reference.as_str().to_string(),
        }
    }

    /// Parse metadata out of an arbitrary JSON value taken from a larger
    /// configuration document.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CryptoError> {
        serde_json::from_value(value.clone()).map_err(|e| {
            error!(error = %e, "item metadata is not well formed");
            CryptoError::InvalidMetadata("unreadable metadata".into())
        })
    }

    /// Check the version and prefix, returning the typed reference.
    pub(crate) fn validate(&self, prefix: &str) -> Result<StashItemRef, CryptoError> {
        if self.version != METADATA_VERSION {
            return Err(CryptoError::InvalidMetadata(format!(
                "unsupported version {}",
                self.version
            )));
        }
        StashItemRef::parse(prefix, &self.reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    #[test]
    fn parse_requires_prefix_and_single_segment() {
        assert!(StashItemRef::parse("stash", "stash/abc").is_ok());
        assert!(StashItemRef::parse("stash", "other/abc").is_err());
        assert!(StashItemRef::parse("stash", "stash/").is_err());
        assert!(StashItemRef::parse("stash", "stash/a/b").is_err());
        assert!(StashItemRef::parse("stash", "stashabc").is_err());
    }

    #[test]
    fn allocate_returns_fresh_reference() {
        let store = MemoryObjectStore::new();
        let r = allocate(&store, "c", "stash", 2).unwrap();
        assert!(r.as_str().starts_with("stash/"));
        assert!(StashItemRef::parse("stash", r.as_str()).is_ok());
        assert_eq!(r.as_str().len(), "stash/".len() + 36);
    }

    #[test]
    fn metadata_json_shape() {
        let r = StashItemRef::parse("stash", "stash/1234").unwrap();
        let json = serde_json::to_value(ItemMetadata::new(&r)).unwrap();
        assert_eq!(json, serde_json::json!({"version": 1, "ref": "stash/1234"}));
    }

    #[test]
    fn metadata_validation() {
        let bad_version = ItemMetadata {
            version: 2,
            reference: "stash/x".into(),
        };
        assert!(matches!(
            bad_version.validate("stash"),
            Err(CryptoError::InvalidMetadata(_))
        ));

        let missing_ref = serde_json::json!({"version": 1});
        assert!(matches!(
            ItemMetadata::from_value(&missing_ref),
            Err(CryptoError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn unreadable_metadata_hides_parser_detail() {
        let err = ItemMetadata::from_value(&serde_json::json!({"version": 1})).unwrap_err();
        assert_eq!(err.to_string(), "invalid item metadata: unreadable metadata");

        let err = ItemMetadata::from_value(&serde_json::json!({"version": "one", "ref": 7})).unwrap_err();
        let rendered = err.to_string();
        assert!(!rendered.contains("missing field"));
        assert!(!rendered.contains("invalid type"));
    }
}
