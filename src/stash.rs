//! The stash orchestrator.
//!
//! A `CryptoStash` is bound to one tenant container, one master secret and
//! one set of stash parameters. It allocates references, derives item
//! passwords, and moves encrypted items in and out of the object store.
//! It keeps no state beyond its parameters and the cached stage-1 key, and
//! is meant to live for a single request.
//!
//! ```text
//! Uninitialized --init_params()--> Initialized
//! ```

use std::cell::OnceCell;
use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::config::StashConfig;
use crate::error::CryptoError;
use crate::item::{CertMaterial, Certificate, KeyMaterial, PrivateKey, StashItem};
use crate::keys::{ItemPassword, MasterSecret, Stage1Key, StashParameters};
use crate::reference::{self, ItemMetadata, StashItemRef};
use crate::store::{self, ObjectStore, StoreError};
use crate::tempurl::TempUrlSigner;

const PRIVATE_KEY_CONTENT_TYPE: &str = "application/pkcs8";
const CERTIFICATE_CONTENT_TYPE: &str = "application/x-pem-file";

/// The credential stash for one tenant container.
pub struct CryptoStash<S> {
    store: S,
    container: String,
    master: Arc<MasterSecret>,
    config: StashConfig,
    params: Option<StashParameters>,
    s1key: OnceCell<Stage1Key>,
}

impl<S: ObjectStore> CryptoStash<S> {
    /// Create an uninitialised stash. Call `init_params` before use.
    pub fn new(
        store: S,
        container: impl Into<String>,
        master: Arc<MasterSecret>,
        config: StashConfig,
    ) -> Result<Self, CryptoError> {
        config.validate()?;
        Ok(Self {
            store,
            container: container.into(),
            master,
            config,
            params: None,
            s1key: OnceCell::new(),
        })
    }

    /// Initialise with persisted parameters, or generate fresh ones.
    ///
    /// Persisted parameters must be version 1 with a salt of at least 32
    /// bytes. After success, `params()` returns what the caller must
    /// persist; persisting a different salt later orphans every item.
    pub fn init_params(&mut self, stored: Option<StashParameters>) -> Result<(), CryptoError> {
        let params = match stored {
            Some(params) => {
                params.salt_bytes()?;
                params
            }
            None => {
                info!(container = %self.container, "generating new stash parameters");
                StashParameters::generate()?
            }
        };
        self.params = Some(params);
        self.s1key = OnceCell::new();
        Ok(())
    }

    /// The parameters to persist, once initialised.
    pub fn params(&self) -> Option<&StashParameters> {
        self.params.as_ref()
    }

    pub fn is_initialised(&self) -> bool {
        self.params.is_some()
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn config(&self) -> &StashConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    fn require_initialised(&self) -> Result<(), CryptoError> {
        if self.params.is_none() {
            return Err(CryptoError::NotInitialised);
        }
        Ok(())
    }

    fn stage1(&self) -> Result<&Stage1Key, CryptoError> {
        if let Some(key) = self.s1key.get() {
            return Ok(key);
        }
        let params = self.params.as_ref().ok_or(CryptoError::NotInitialised)?;
        let key = Stage1Key::derive(&self.master, params)?;
        Ok(self.s1key.get_or_init(|| key))
    }

    /// The password for one item. Recomputed on every call.
    pub fn item_password(&self, reference: &StashItemRef) -> Result<ItemPassword, CryptoError> {
        Ok(self.stage1()?.item_password(reference.as_str()))
    }

    fn allocate(&self) -> Result<StashItemRef, CryptoError> {
        reference::allocate(
            &self.store,
            &self.container,
            &self.config.item_prefix,
            self.config.reference_attempts,
        )
    }

    fn put(
        &self,
        reference: &StashItemRef,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), CryptoError> {
        self.store
            .put(&self.container, reference.as_str(), data, content_type)
            .map_err(|e| store::storage_fault(&self.container, reference.as_str(), "put", e))
    }

    fn fetch(&self, metadata: &ItemMetadata) -> Result<(StashItemRef, Vec<u8>), CryptoError> {
        let reference = metadata.validate(&self.config.item_prefix)?;
        let object = self
            .store
            .get(&self.container, reference.as_str())
            .map_err(|e| store::storage_fault(&self.container, reference.as_str(), "get", e))?;
        Ok((reference, object.data))
    }

    // -----------------------------------------------------------------------
    // Private keys
    // -----------------------------------------------------------------------

    /// Generate a new RSA-3072 key and store it encrypted.
    ///
    /// The caller persists `key.metadata()`. A failed write is not rolled
    /// back here: the reference was never handed out.
    pub fn create_private_key(&self) -> Result<PrivateKey, CryptoError> {
        self.stage1()?;
        let material = PrivateKey::generate_material()?;
        self.store_private_key(material)
    }

    /// Validate an uploaded PEM key and store it encrypted.
    pub fn import_private_key(&self, upload: &[u8]) -> Result<PrivateKey, CryptoError> {
        self.stage1()?;
        let material = PrivateKey::parse_upload(upload)?;
        self.store_private_key(material)
    }

    fn store_private_key(&self, material: KeyMaterial) -> Result<PrivateKey, CryptoError> {
        let reference = self.allocate()?;
        let password = self.item_password(&reference)?;
        let key = PrivateKey::new(reference, material);
        let pem = key.export_encrypted(&password)?;
        self.put(key.reference(), &pem, PRIVATE_KEY_CONTENT_TYPE)?;
        info!(container = %self.container, reference = %key.reference(), "stored private key");
        Ok(key)
    }

    /// Fetch and decrypt a key previously stored by this stash.
    pub fn load_private_key(&self, metadata: &ItemMetadata) -> Result<PrivateKey, CryptoError> {
        let (reference, pem) = self.fetch(metadata)?;
        let password = self.item_password(&reference)?;
        PrivateKey::decrypt(reference, &pem, &password)
    }

    // -----------------------------------------------------------------------
    // Certificates
    // -----------------------------------------------------------------------

    /// Create and store a self-signed CA certificate for `key`.
    pub fn create_x509_cert(
        &self,
        key: &PrivateKey,
        subject_cn: &str,
        valid_days: u32,
    ) -> Result<Certificate, CryptoError> {
        let material = Certificate::self_signed(key, subject_cn, valid_days)?;
        self.store_certificate(material)
    }

    /// Validate an uploaded PEM certificate and store it.
    pub fn import_x509_cert(&self, upload: &[u8]) -> Result<Certificate, CryptoError> {
        let material = Certificate::parse_upload(upload)?;
        self.store_certificate(material)
    }

    fn store_certificate(&self, material: CertMaterial) -> Result<Certificate, CryptoError> {
        self.require_initialised()?;
        let reference = self.allocate()?;
        let cert = Certificate::new(reference, material);
        let pem = cert.to_pem()?;
        self.put(cert.reference(), &pem, CERTIFICATE_CONTENT_TYPE)?;
        info!(container = %self.container, reference = %cert.reference(), "stored certificate");
        Ok(cert)
    }

    pub fn load_x509_cert(&self, metadata: &ItemMetadata) -> Result<Certificate, CryptoError> {
        self.require_initialised()?;
        let (reference, pem) = self.fetch(metadata)?;
        Certificate::from_stored(reference, &pem)
    }

    // -----------------------------------------------------------------------
    // Deletion and retrieval URLs
    // -----------------------------------------------------------------------

    /// Remove an item's blob. An already missing blob counts as deleted.
    pub fn delete(&self, item: &impl StashItem) -> Result<(), CryptoError> {
        self.delete_ref(item.reference())
    }

    /// Remove the blob at `reference`. This is the compensation primitive
    /// used by `StashTransaction`.
    pub fn delete_ref(&self, reference: &StashItemRef) -> Result<(), CryptoError> {
        let reference = StashItemRef::parse(&self.config.item_prefix, reference.as_str())?;
        match self.store.delete(&self.container, reference.as_str()) {
            Ok(()) => {
                info!(container = %self.container, reference = %reference, "deleted stash item");
                Ok(())
            }
            Err(StoreError::NotFound) => {
                warn!(container = %self.container, reference = %reference, "stash item already absent");
                Ok(())
            }
            Err(e) => Err(store::storage_fault(&self.container, reference.as_str(), "delete", e)),
        }
    }

    /// The object-store URL of an item under `endpoint`.
    pub fn public_url(&self, item: &impl StashItem, endpoint: &Url) -> Result<Url, CryptoError> {
        let mut url = endpoint.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| CryptoError::Operation("build object URL"))?
            .pop_if_empty()
            .push(&self.container)
            .extend(item.reference().as_str().split('/'));
        Ok(url)
    }

    /// A time-limited signed URL for retrieving an item out of band.
    pub fn temp_url(
        &self,
        item: &impl StashItem,
        signer: &TempUrlSigner,
        endpoint: &Url,
    ) -> Result<Url, CryptoError> {
        let url = self.public_url(item, endpoint)?;
        Ok(signer.sign_url(&url, self.config.temp_url_ttl_secs))
    }
}
