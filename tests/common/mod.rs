//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use cryptostash::store::{AccountHeaders, MemoryObjectStore, ObjectStore, StoreError, StoredObject};
use cryptostash::{CryptoStash, MasterSecret, StashConfig};

pub const CONTAINER: &str = "nci-private-tenant1";

pub fn master() -> Arc<MasterSecret> {
    Arc::new(MasterSecret::from_bytes(vec![0x42; 32]).unwrap())
}

/// An initialised stash with fresh parameters.
pub fn stash<S: ObjectStore>(store: S) -> CryptoStash<S> {
    let mut stash = CryptoStash::new(store, CONTAINER, master(), StashConfig::default()).unwrap();
    stash.init_params(None).unwrap();
    stash
}

/// A memory store with failure injection.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryObjectStore,
    puts_allowed: Cell<Option<usize>>,
    failing_names: RefCell<Vec<String>>,
    fail_deletes: Cell<bool>,
    forced_collisions: Cell<usize>,
    exists_calls: Cell<usize>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the next `n` puts succeed, then fail every later one.
    pub fn allow_puts(&self, n: usize) {
        self.puts_allowed.set(Some(n));
    }

    /// Fail every put to `name`.
    pub fn fail_put_to(&self, name: &str) {
        self.failing_names.borrow_mut().push(name.to_string());
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.set(true);
    }

    /// Report the next `n` existence checks as taken.
    pub fn force_collisions(&self, n: usize) {
        self.forced_collisions.set(n);
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.get()
    }
}

impl ObjectStore for FaultyStore {
    fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError> {
        self.exists_calls.set(self.exists_calls.get() + 1);
        let forced = self.forced_collisions.get();
        if forced > 0 {
            self.forced_collisions.set(forced - 1);
            return Ok(true);
        }
        self.inner.exists(container, name)
    }

    fn get(&self, container: &str, name: &str) -> Result<StoredObject, StoreError> {
        self.inner.get(container, name)
    }

    fn put(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        if self.failing_names.borrow().iter().any(|n| n == name) {
            return Err(StoreError::Backend(format!("injected put failure: {}", name)));
        }
        match self.puts_allowed.get() {
            Some(0) => return Err(StoreError::Backend("injected put failure".into())),
            Some(n) => self.puts_allowed.set(Some(n - 1)),
            None => {}
        }
        self.inner.put(container, name, data, content_type)
    }

    fn delete(&self, container: &str, name: &str) -> Result<(), StoreError> {
        if self.fail_deletes.get() {
            return Err(StoreError::Backend("injected delete failure".into()));
        }
        self.inner.delete(container, name)
    }

    fn copy(
        &self,
        src_container: &str,
        src_name: &str,
        dst_container: &str,
        dst_name: &str,
    ) -> Result<(), StoreError> {
        self.inner.copy(src_container, src_name, dst_container, dst_name)
    }

    fn head_account(&self) -> Result<AccountHeaders, StoreError> {
        self.inner.head_account()
    }

    fn post_account(&self, headers: &AccountHeaders) -> Result<(), StoreError> {
        self.inner.post_account(headers)
    }
}
