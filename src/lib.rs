//! # cryptostash
//!
//! Encrypted credential stash layered on an object store.
//!
//! Private keys and certificates are stored as blobs in a per-tenant
//! container under opaque references. Each private key is encrypted with a
//! password derived from a deployment master secret, a per-stash salt and
//! the item's reference; nothing but the reference is ever persisted by the
//! caller. The backend has no transactions, so multi-item writes go through
//! [`StashTransaction`], which deletes what it created unless the final
//! document write succeeds.
//!
//! ## Public API
//!
//! Callers build a [`CryptoStash`] per request from a shared
//! [`MasterSecret`], a [`StashConfig`] and an [`ObjectStore`]
//! implementation, then call `init_params` with the persisted
//! [`StashParameters`] (or `None` for a new stash).

pub mod config;
pub(crate) mod crypto;
pub mod document;
pub mod error;
pub mod item;
pub mod keys;
pub mod reference;
pub mod stash;
pub mod store;
pub mod tempurl;
pub mod txn;

pub use config::StashConfig;
pub use error::{CryptoError, UploadRejection};
pub use item::{verify_key_pair, Certificate, PrivateKey, PublicKeyFormat, StashItem};
pub use keys::{ItemPassword, MasterSecret, Stage1Key, StashParameters};
pub use reference::{ItemMetadata, StashItemRef};
pub use stash::CryptoStash;
pub use store::{MemoryObjectStore, ObjectStore, StoreError, StoredObject};
pub use tempurl::TempUrlSigner;
pub use txn::{RollbackReport, StashTransaction};
