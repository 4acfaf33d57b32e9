//! Multi-item writes with compensation.
//!
//! The object store has no transactions, so a unit of several stash items
//! plus the document that references them is made all-or-nothing by hand:
//!
//! 1. Every item created through the transaction is pushed onto a pending
//!    list.
//! 2. The document write is the commit point. Once it succeeds the items are
//!    owned by the document and the list is cleared.
//! 3. On any failure before that, or if the transaction is dropped without
//!    committing, the pending items are deleted in reverse order.
//!
//! Failures while compensating are logged and reported, never retried.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::document;
use crate::error::CryptoError;
use crate::item::{Certificate, PrivateKey, StashItem};
use crate::reference::StashItemRef;
use crate::stash::CryptoStash;
use crate::store::ObjectStore;

/// Outcome of a rollback.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    /// Items whose blobs were removed.
    pub deleted: Vec<StashItemRef>,
    /// Items that could not be removed and are now unreferenced.
    pub leaked: Vec<StashItemRef>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty()
    }
}

/// A scoped unit of stash writes that is rolled back unless committed.
pub struct StashTransaction<'s, S: ObjectStore> {
    stash: &'s CryptoStash<S>,
    pending: Vec<StashItemRef>,
    finished: bool,
}

impl<'s, S: ObjectStore> StashTransaction<'s, S> {
    pub fn begin(stash: &'s CryptoStash<S>) -> Self {
        Self {
            stash,
            pending: Vec::new(),
            finished: false,
        }
    }

    /// Register an item created outside the transaction for compensation.
    pub fn track(&mut self, item: &impl StashItem) {
        self.pending.push(item.reference().clone());
    }

    /// References created so far and not yet committed.
    pub fn pending(&self) -> &[StashItemRef] {
        &self.pending
    }

    pub fn create_private_key(&mut self) -> Result<PrivateKey, CryptoError> {
        let key = self.stash.create_private_key()?;
        self.track(&key);
        Ok(key)
    }

    pub fn import_private_key(&mut self, upload: &[u8]) -> Result<PrivateKey, CryptoError> {
        let key = self.stash.import_private_key(upload)?;
        self.track(&key);
        Ok(key)
    }

    pub fn create_x509_cert(
        &mut self,
        key: &PrivateKey,
        subject_cn: &str,
        valid_days: u32,
    ) -> Result<Certificate, CryptoError> {
        let cert = self.stash.create_x509_cert(key, subject_cn, valid_days)?;
        self.track(&cert);
        Ok(cert)
    }

    pub fn import_x509_cert(&mut self, upload: &[u8]) -> Result<Certificate, CryptoError> {
        let cert = self.stash.import_x509_cert(upload)?;
        self.track(&cert);
        Ok(cert)
    }

    /// Commit by running the caller's single persisting write.
    ///
    /// If `persist` fails, every pending item is deleted before the error is
    /// returned.
    pub fn commit_with<F>(mut self, persist: F) -> Result<(), CryptoError>
    where
        F: FnOnce(&CryptoStash<S>) -> Result<(), CryptoError>,
    {
        match persist(self.stash) {
            Ok(()) => {
                info!(
                    container = self.stash.container(),
                    items = self.pending.len(),
                    "committed stash transaction"
                );
                self.pending.clear();
                self.finished = true;
                Ok(())
            }
            Err(e) => {
                warn!(
                    container = self.stash.container(),
                    error = %e,
                    "persisting stash transaction failed, rolling back"
                );
                self.rollback_pending();
                Err(e)
            }
        }
    }

    /// Commit by saving `doc` as the named document in the stash container.
    pub fn commit_document<T>(self, name: &str, doc: &T) -> Result<(), CryptoError>
    where
        T: Serialize + ?Sized,
    {
        self.commit_with(|stash| document::save(stash.store(), stash.container(), name, doc))
    }

    /// Abandon the transaction and delete everything it created.
    pub fn rollback(mut self) -> RollbackReport {
        self.rollback_pending()
    }

    fn rollback_pending(&mut self) -> RollbackReport {
        self.finished = true;
        let mut report = RollbackReport::default();

        while let Some(reference) = self.pending.pop() {
            match self.stash.delete_ref(&reference) {
                Ok(()) => report.deleted.push(reference),
                Err(e) => {
                    error!(
                        container = self.stash.container(),
                        reference = %reference,
                        error = %e,
                        "failed to delete stash item during rollback, item leaked"
                    );
                    report.leaked.push(reference);
                }
            }
        }
        report
    }
}

impl<S: ObjectStore> Drop for StashTransaction<'_, S> {
    fn drop(&mut self) {
        if !self.finished && !self.pending.is_empty() {
            warn!(
                container = self.stash.container(),
                items = self.pending.len(),
                "stash transaction dropped without commit, rolling back"
            );
            self.rollback_pending();
        }
    }
}
