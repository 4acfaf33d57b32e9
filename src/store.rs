//! Object store collaborator.
//!
//! The stash consumes a plain blob store addressed by (container, object
//! name) plus account-level metadata headers. The backend offers no
//! transactions and no atomic create-if-absent; the stash designs around
//! both. Timeouts and retries belong to the backend client.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;

use chrono::Utc;
use tracing::error;

use crate::error::CryptoError;

/// Account-level metadata headers, keyed by header name.
pub type AccountHeaders = BTreeMap<String, String>;

/// Errors reported by an object store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The container or object does not exist.
    NotFound,
    /// Any other backend failure. The message is for logs only.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "object not found"),
            Self::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// An object fetched from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub timestamp: Option<String>,
}

/// A blob store with container/object semantics.
pub trait ObjectStore {
    fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError>;

    fn get(&self, container: &str, name: &str) -> Result<StoredObject, StoreError>;

    fn put(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError>;

    fn delete(&self, container: &str, name: &str) -> Result<(), StoreError>;

    fn copy(
        &self,
        src_container: &str,
        src_name: &str,
        dst_container: &str,
        dst_name: &str,
    ) -> Result<(), StoreError>;

    fn head_account(&self) -> Result<AccountHeaders, StoreError>;

    /// Merge `headers` into the account metadata.
    fn post_account(&self, headers: &AccountHeaders) -> Result<(), StoreError>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for &T {
    fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError> {
        (**self).exists(container, name)
    }

    fn get(&self, container: &str, name: &str) -> Result<StoredObject, StoreError> {
        (**self).get(container, name)
    }

    fn put(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        (**self).put(container, name, data, content_type)
    }

    fn delete(&self, container: &str, name: &str) -> Result<(), StoreError> {
        (**self).delete(container, name)
    }

    fn copy(
        &self,
        src_container: &str,
        src_name: &str,
        dst_container: &str,
        dst_name: &str,
    ) -> Result<(), StoreError> {
        (**self).copy(src_container, src_name, dst_container, dst_name)
    }

    fn head_account(&self) -> Result<AccountHeaders, StoreError> {
        (**self).head_account()
    }

    fn post_account(&self, headers: &AccountHeaders) -> Result<(), StoreError> {
        (**self).post_account(headers)
    }
}

/// Log a backend failure and turn it into the caller-facing error.
pub(crate) fn storage_fault(
    container: &str,
    name: &str,
    op: &'static str,
    err: StoreError,
) -> CryptoError {
    error!(container, object = name, op, error = %err, "object store request failed");
    CryptoError::Storage {
        object: name.to_string(),
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    content_type: String,
    timestamp: String,
}

/// A process-local `ObjectStore` used by tests, benches and the demo.
///
/// Header names are lowercased on write, matching what HTTP backends hand
/// back from `head_account`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), MemoryObject>>,
    account: Mutex<AccountHeaders>,
    drop_account_meta: bool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that accepts `post_account` but never reports the headers
    /// back, like backends that fail to propagate fresh account metadata.
    pub fn with_lossy_account_metadata() -> Self {
        Self {
            drop_account_meta: true,
            ..Self::default()
        }
    }

    /// Names of every object in `container`, sorted.
    pub fn object_names(&self, container: &str) -> Vec<String> {
        let objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<String> = objects
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Content type an object was written with.
    pub fn content_type(&self, container: &str, name: &str) -> Option<String> {
        let objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        objects
            .get(&(container.to_string(), name.to_string()))
            .map(|o| o.content_type.clone())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError> {
        let objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        Ok(objects.contains_key(&(container.to_string(), name.to_string())))
    }

    fn get(&self, container: &str, name: &str) -> Result<StoredObject, StoreError> {
        let objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        objects
            .get(&(container.to_string(), name.to_string()))
            .map(|o| StoredObject {
                data: o.data.clone(),
                timestamp: Some(o.timestamp.clone()),
            })
            .ok_or(StoreError::NotFound)
    }

    fn put(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        objects.insert(
            (container.to_string(), name.to_string()),
            MemoryObject {
                data: data.to_vec(),
                content_type: content_type.to_string(),
                timestamp: Utc::now().to_rfc3339(),
            },
        );
        Ok(())
    }

    fn delete(&self, container: &str, name: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        objects
            .remove(&(container.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn copy(
        &self,
        src_container: &str,
        src_name: &str,
        dst_container: &str,
        dst_name: &str,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        let mut object = objects
            .get(&(src_container.to_string(), src_name.to_string()))
            .cloned()
            .ok_or(StoreError::NotFound)?;
        object.timestamp = Utc::now().to_rfc3339();
        objects.insert((dst_container.to_string(), dst_name.to_string()), object);
        Ok(())
    }

    fn head_account(&self) -> Result<AccountHeaders, StoreError> {
        if self.drop_account_meta {
            return Ok(AccountHeaders::new());
        }
        let account = self.account.lock().unwrap_or_else(|p| p.into_inner());
        Ok(account.clone())
    }

    fn post_account(&self, headers: &AccountHeaders) -> Result<(), StoreError> {
        let mut account = self.account.lock().unwrap_or_else(|p| p.into_inner());
        for (name, value) in headers {
            account.insert(name.to_ascii_lowercase(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryObjectStore::new();
        store.put("c", "a/b", b"data", "text/plain").unwrap();
        assert!(store.exists("c", "a/b").unwrap());
        assert!(!store.exists("other", "a/b").unwrap());
        assert_eq!(store.get("c", "a/b").unwrap().data, b"data");

        store.delete("c", "a/b").unwrap();
        assert_eq!(store.delete("c", "a/b"), Err(StoreError::NotFound));
        assert_eq!(store.get("c", "a/b"), Err(StoreError::NotFound));
    }

    #[test]
    fn copy_keeps_source() {
        let store = MemoryObjectStore::new();
        store.put("c", "src", b"v1", "application/json").unwrap();
        store.copy("c", "src", "c", "dst").unwrap();
        assert_eq!(store.get("c", "dst").unwrap().data, b"v1");
        assert_eq!(store.object_names("c"), vec!["dst", "src"]);
        assert_eq!(store.content_type("c", "dst").as_deref(), Some("application/json"));
    }

    #[test]
    fn account_headers_are_lowercased() {
        let store = MemoryObjectStore::new();
        let mut headers = AccountHeaders::new();
        headers.insert("X-Account-Meta-Thing".into(), "v".into());
        store.post_account(&headers).unwrap();
        assert_eq!(
            store.head_account().unwrap().get("x-account-meta-thing").map(String::as_str),
            Some("v")
        );

        let lossy = MemoryObjectStore::with_lossy_account_metadata();
        lossy.post_account(&headers).unwrap();
        assert!(lossy.head_account().unwrap().is_empty());
    }
}
