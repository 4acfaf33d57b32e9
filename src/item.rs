//! Stash items: private keys and certificates.
//!
//! This module is the only place in the crate that imports `openssl`. It
//! wraps the key and certificate material in typed items carrying their
//! stash reference, and gates uploads before they are accepted.
//!
//! Item formats at rest:
//! - **Private key**: PKCS#8 PEM, encrypted with AES-256-CBC under the item password
//! - **Certificate**: plain PEM (public material)

use std::cell::OnceCell;
use std::fmt;

use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::{self, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use openssl::symm::Cipher;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Name, X509};
use ssh_key::public::{KeyData, RsaPublicKey};
use ssh_key::Mpint;
use tracing::{debug, error};

use crate::error::{CryptoError, UploadRejection};
use crate::keys::ItemPassword;
use crate::reference::{ItemMetadata, StashItemRef};

/// Largest accepted key or certificate upload in bytes.
pub const MAX_UPLOAD_SIZE: usize = 262_144;

/// Smallest accepted RSA modulus for imported keys.
pub const MIN_KEY_BITS: u32 = 3072;

/// Modulus size of generated keys. The public exponent is 65537.
pub const GENERATED_KEY_BITS: u32 = 3072;

const X509_VERSION_3: i32 = 2;
const SECONDS_PER_DAY: i64 = 86_400;

/// Signed during `verify_key_pair`; its content is irrelevant.
const VERIFY_PLAINTEXT: &[u8] = b"cryptostash key pair verification";

/// Common behavior of everything the stash stores.
pub trait StashItem {
    fn reference(&self) -> &StashItemRef;

    /// The record the caller persists to find this item again.
    fn metadata(&self) -> ItemMetadata {
        ItemMetadata::new(self.reference())
    }
}

/// Public key export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyFormat {
    /// SubjectPublicKeyInfo PEM.
    Pem,
    /// `ssh-rsa <base64>` without a comment.
    OpenSsh,
}

fn item_fault(reference: &StashItemRef, action: &'static str, err: impl fmt::Display) -> CryptoError {
    error!(reference = %reference, action, error = %err, "stash item operation failed");
    CryptoError::Item {
        reference: reference.as_str().to_string(),
        action,
    }
}

fn operation_fault(action: &'static str, err: ErrorStack) -> CryptoError {
    error!(action, error = %err, "cryptographic operation failed");
    CryptoError::Operation(action)
}

fn hex_join(bytes: &[u8], sep: &str) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(sep)
}

fn check_upload_size(data: &[u8]) -> Result<(), UploadRejection> {
    if data.len() > MAX_UPLOAD_SIZE {
        return Err(UploadRejection::TooLarge {
            size: data.len(),
            limit: MAX_UPLOAD_SIZE,
        });
    }
    Ok(())
}

/// Key material not yet bound to a reference.
pub(crate) struct KeyMaterial(PKey<Private>);

/// Certificate material not yet bound to a reference.
pub(crate) struct CertMaterial(X509);

// ---------------------------------------------------------------------------
// Private key
// ---------------------------------------------------------------------------

/// An RSA key pair held in the stash.
pub struct PrivateKey {
    reference: StashItemRef,
    pkey: PKey<Private>,
    ssh_data: OnceCell<KeyData>,
}

impl PrivateKey {
    pub(crate) fn new(reference: StashItemRef, material: KeyMaterial) -> Self {
        Self {
            reference,
            pkey: material.0,
            ssh_data: OnceCell::new(),
        }
    }

    /// Generate a fresh RSA key pair.
    pub(crate) fn generate_material() -> Result<KeyMaterial, CryptoError> {
        let rsa = Rsa::generate(GENERATED_KEY_BITS)
            .map_err(|e| operation_fault("generate new private key", e))?;
        let pkey = PKey::from_rsa(rsa).map_err(|e| operation_fault("generate new private key", e))?;
        Ok(KeyMaterial(pkey))
    }

    /// Validate an uploaded, unencrypted PEM key.
    ///
    /// The size gate runs before any parsing. Passphrase-protected uploads
    /// are refused rather than prompting for a passphrase.
    pub(crate) fn parse_upload(data: &[u8]) -> Result<KeyMaterial, CryptoError> {
        check_upload_size(data)?;

        let pkey = PKey::private_key_from_pem_callback(data, |_| Ok(0)).map_err(|e| {
            debug!(error = %e, "uploaded private key did not parse");
            UploadRejection::NotAValidKey
        })?;
        if pkey.id() != Id::RSA {
            return Err(UploadRejection::NotAValidKey.into());
        }

        let bits = pkey.bits();
        if bits < MIN_KEY_BITS {
            return Err(UploadRejection::KeyTooWeak {
                bits,
                minimum: MIN_KEY_BITS,
            }
            .into());
        }
        Ok(KeyMaterial(pkey))
    }

    /// Decrypt a stored key with its item password.
    pub(crate) fn decrypt(
        reference: StashItemRef,
        pem: &[u8],
        password: &ItemPassword,
    ) -> Result<Self, CryptoError> {
        let pkey = PKey::private_key_from_pem_passphrase(pem, password.as_bytes())
            .map_err(|e| item_fault(&reference, "decrypt", e))?;
        Ok(Self::new(reference, KeyMaterial(pkey)))
    }

    /// Encrypted PKCS#8 PEM, as written to the store.
    pub(crate) fn export_encrypted(&self, password: &ItemPassword) -> Result<Vec<u8>, CryptoError> {
        self.pkey
            .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), password.as_bytes())
            .map_err(|e| item_fault(&self.reference, "export", e))
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> u32 {
        self.pkey.bits()
    }

    /// Export the public half in the requested format.
    pub fn export_public(&self, format: PublicKeyFormat) -> Result<String, CryptoError> {
        match format {
            PublicKeyFormat::Pem => {
                let pem = self
                    .pkey
                    .public_key_to_pem()
                    .map_err(|e| item_fault(&self.reference, "export public key of", e))?;
                String::from_utf8(pem).map_err(|_| CryptoError::Item {
                    reference: self.reference.as_str().to_string(),
                    action: "export public key of",
                })
            }
            PublicKeyFormat::OpenSsh => self.openssh_line(""),
        }
    }

    /// OpenSSH public key line, optionally followed by a comment.
    pub fn ssh_public_key(&self, comment: Option<&str>) -> Result<String, CryptoError> {
        self.openssh_line(comment.unwrap_or(""))
    }

    /// MD5 SSH fingerprint as hex octets joined by `sep`.
    ///
    /// Computed over the SSH wire encoding of the public key, the form
    /// cloud consoles display for uploaded key pairs.
    pub fn fingerprint(&self, sep: &str) -> Result<String, CryptoError> {
        let blob = ssh_key::PublicKey::new(self.ssh_key_data()?.clone(), "")
            .to_bytes()
            .map_err(|e| item_fault(&self.reference, "fingerprint", e))?;
        let digest = hash::hash(MessageDigest::md5(), &blob)
            .map_err(|e| item_fault(&self.reference, "fingerprint", e))?;
        Ok(hex_join(&digest, sep))
    }

    fn openssh_line(&self, comment: &str) -> Result<String, CryptoError> {
        ssh_key::PublicKey::new(self.ssh_key_data()?.clone(), comment)
            .to_openssh()
            .map_err(|e| item_fault(&self.reference, "convert to SSH format", e))
    }

    /// The public key as SSH key data, built once.
    fn ssh_key_data(&self) -> Result<&KeyData, CryptoError> {
        if let Some(data) = self.ssh_data.get() {
            return Ok(data);
        }

        let rsa = self
            .pkey
            .rsa()
            .map_err(|e| item_fault(&self.reference, "convert to SSH format", e))?;
        let e = Mpint::from_positive_bytes(&rsa.e().to_vec())
            .map_err(|err| item_fault(&self.reference, "convert to SSH format", err))?;
        let n = Mpint::from_positive_bytes(&rsa.n().to_vec())
            .map_err(|err| item_fault(&self.reference, "convert to SSH format", err))?;
        let data = KeyData::Rsa(RsaPublicKey { e, n });
        Ok(self.ssh_data.get_or_init(|| data))
    }
}

impl StashItem for PrivateKey {
    fn reference(&self) -> &StashItemRef {
        &self.reference
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

/// An X.509 certificate held in the stash. Stored unencrypted.
pub struct Certificate {
    reference: StashItemRef,
    cert: X509,
}

impl Certificate {
    pub(crate) fn new(reference: StashItemRef, material: CertMaterial) -> Self {
        Self {
            reference,
            cert: material.0,
        }
    }

    /// Build a self-signed CA certificate for `key`.
    ///
    /// Basic constraints are CA:true with path length 0. The validity
    /// window starts one day in the past to tolerate clock skew.
    pub(crate) fn self_signed(
        key: &PrivateKey,
        subject_cn: &str,
        valid_days: u32,
    ) -> Result<CertMaterial, CryptoError> {
        Self::build_self_signed(&key.pkey, subject_cn, valid_days)
            .map(CertMaterial)
            .map_err(|e| operation_fault("create self-signed certificate", e))
    }

    fn build_self_signed(
        pkey: &PKey<Private>,
        subject_cn: &str,
        valid_days: u32,
    ) -> Result<X509, ErrorStack> {
        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;

        let mut serial = BigNum::new()?;
        serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
        let serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;

        let mut name = X509Name::builder()?;
        name.append_entry_by_nid(Nid::COMMONNAME, subject_cn)?;
        let name = name.build();
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;

        let now = Utc::now().timestamp();
        let not_before = Asn1Time::from_unix(now - SECONDS_PER_DAY)?;
        let not_after = Asn1Time::from_unix(now + i64::from(valid_days) * SECONDS_PER_DAY)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.set_pubkey(pkey)?;
        builder.append_extension(BasicConstraints::new().critical().ca().pathlen(0).build()?)?;
        builder.sign(pkey, MessageDigest::sha256())?;
        Ok(builder.build())
    }

    /// Validate an uploaded PEM certificate.
    pub(crate) fn parse_upload(data: &[u8]) -> Result<CertMaterial, CryptoError> {
        check_upload_size(data)?;
        let cert = X509::from_pem(data).map_err(|e| {
            debug!(error = %e, "uploaded certificate did not parse");
            UploadRejection::NotAValidCertificate
        })?;
        Ok(CertMaterial(cert))
    }

    /// Parse a stored certificate.
    pub(crate) fn from_stored(reference: StashItemRef, pem: &[u8]) -> Result<Self, CryptoError> {
        let cert = X509::from_pem(pem).map_err(|e| item_fault(&reference, "load", e))?;
        Ok(Self::new(reference, CertMaterial(cert)))
    }

    pub fn to_pem(&self) -> Result<Vec<u8>, CryptoError> {
        self.cert
            .to_pem()
            .map_err(|e| item_fault(&self.reference, "export", e))
    }

    /// The certificate's public key as SubjectPublicKeyInfo PEM.
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        let pem = self
            .cert
            .public_key()
            .and_then(|k| k.public_key_to_pem())
            .map_err(|e| item_fault(&self.reference, "export public key of", e))?;
        String::from_utf8(pem).map_err(|_| CryptoError::Item {
            reference: self.reference.as_str().to_string(),
            action: "export public key of",
        })
    }

    /// SHA-256 fingerprint as hex octets joined by `sep`.
    pub fn fingerprint(&self, sep: &str) -> Result<String, CryptoError> {
        let digest = self
            .cert
            .digest(MessageDigest::sha256())
            .map_err(|e| item_fault(&self.reference, "fingerprint", e))?;
        Ok(hex_join(&digest, sep))
    }

    /// The subject common name, if present and valid UTF-8.
    pub fn subject_cn(&self) -> Option<String> {
        self.cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| String::from_utf8(entry.data().as_slice().to_vec()).ok())
    }

    pub fn as_x509(&self) -> &X509 {
        &self.cert
    }
}

impl StashItem for Certificate {
    fn reference(&self) -> &StashItemRef {
        &self.reference
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("reference", &self.reference)
            .field("subject_cn", &self.subject_cn())
            .finish()
    }
}

/// Check that `cert` carries the public half of `key`.
///
/// Signs a fixed plaintext with the key and verifies it with the
/// certificate's public key. A mismatch is `Ok(false)`; only failures of
/// the signing machinery itself are errors.
pub fn verify_key_pair(cert: &Certificate, key: &PrivateKey) -> Result<bool, CryptoError> {
    let public = cert
        .cert
        .public_key()
        .map_err(|e| item_fault(&cert.reference, "read public key of", e))?;
    if public.id() != key.pkey.id() {
        return Ok(false);
    }

    let signature = {
        let mut signer = Signer::new(MessageDigest::sha256(), &key.pkey)
            .map_err(|e| item_fault(&key.reference, "sign with", e))?;
        signer
            .update(VERIFY_PLAINTEXT)
            .map_err(|e| item_fault(&key.reference, "sign with", e))?;
        signer
            .sign_to_vec()
            .map_err(|e| item_fault(&key.reference, "sign with", e))?
    };

    let mut verifier = Verifier::new(MessageDigest::sha256(), &public)
        .map_err(|e| item_fault(&cert.reference, "verify with", e))?;
    verifier
        .update(VERIFY_PLAINTEXT)
        .map_err(|e| item_fault(&cert.reference, "verify with", e))?;
    verifier
        .verify(&signature)
        .map_err(|e| item_fault(&cert.reference, "verify with", e))
}
