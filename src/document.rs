//! Named configuration documents.
//!
//! Callers keep item metadata and stash parameters inside JSON documents
//! stored next to the stash items, e.g. a per-project config object. These
//! are written with a single `put`, which is the commit point of a
//! `StashTransaction`. The previous version is copied to `<name>.bak` first,
//! so one overwrite can always be undone.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::CryptoError;
use crate::store::{self, ObjectStore, StoreError};

const DOCUMENT_CONTENT_TYPE: &str = "application/json";
const BACKUP_SUFFIX: &str = ".bak";

/// The object name holding the backup of `name`.
pub fn backup_name(name: &str) -> String {
    format!("{}{}", name, BACKUP_SUFFIX)
}

/// Read and parse a document. A missing object yields `None`.
pub fn load<S, T>(store: &S, container: &str, name: &str) -> Result<Option<T>, CryptoError>
where
    S: ObjectStore + ?Sized,
    T: DeserializeOwned,
{
    let object = match store.get(container, name) {
        Ok(object) => object,
        Err(StoreError::NotFound) => return Ok(None),
        Err(e) => return Err(store::storage_fault(container, name, "get", e)),
    };

    serde_json::from_slice(&object.data).map(Some).map_err(|e| {
        error!(container, document = name, error = %e, "document is not valid JSON");
        CryptoError::InvalidMetadata(format!("unreadable document: {}", name))
    })
}

/// Serialize and write a document, backing up any previous version first.
///
/// If the backup copy fails the document is left untouched.
pub fn save<S, T>(store: &S, container: &str, name: &str, doc: &T) -> Result<(), CryptoError>
where
    S: ObjectStore + ?Sized,
    T: Serialize + ?Sized,
{
    let data = serde_json::to_vec(doc).map_err(|e| {
        error!(container, document = name, error = %e, "failed to serialize document");
        CryptoError::Operation("serialize document")
    })?;

    let backup = backup_name(name);
    match store.copy(container, name, container, &backup) {
        Ok(()) => info!(container, document = name, "backed up document"),
        Err(StoreError::NotFound) => {}
        Err(e) => return Err(store::storage_fault(container, &backup, "copy", e)),
    }

    store
        .put(container, name, &data, DOCUMENT_CONTENT_TYPE)
        .map_err(|e| store::storage_fault(container, name, "put", e))?;
    info!(container, document = name, "saved document");
    Ok(())
}

/// Put the backup of `name` back in place. Returns `false` if no backup exists.
pub fn restore_backup<S>(store: &S, container: &str, name: &str) -> Result<bool, CryptoError>
where
    S: ObjectStore + ?Sized,
{
    let backup = backup_name(name);
    match store.copy(container, &backup, container, name) {
        Ok(()) => {
            warn!(container, document = name, "restored document from backup");
            Ok(true)
        }
        Err(StoreError::NotFound) => Ok(false),
        Err(e) => Err(store::storage_fault(container, name, "copy", e)),
    }
}
