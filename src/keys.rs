//! Key derivation and ownership.
//!
//! This module owns two responsibilities:
//! 1. Loading the master secret and the per-stash salt, and validating both.
//! 2. Deriving per-item passwords from them in two HMAC-SHA256 stages,
//!    holding every intermediate in types that are zeroised on drop.
//!
//! ## Derivation structure
//!
//! ```text
//! stage1   = HMAC-SHA256(key = salt,   msg = master_secret)
//! password = base64(HMAC-SHA256(key = stage1, msg = reference || 0x01))
//! ```
//!
//! The reference is the only per-item input, so two items in the same stash
//! never share a password. Passwords are recomputed on every access and
//! never persisted.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, KEY_LEN};
use crate::error::CryptoError;

/// Minimum decoded length of the master secret and of the salt.
pub const MIN_SECRET_LEN: usize = 32;

/// The only stash parameters version understood by this crate.
pub const PARAMS_VERSION: u32 = 1;

/// Domain byte appended to the reference in the second stage.
const ITEM_PASSWORD_INFO: u8 = 0x01;

// ---------------------------------------------------------------------------
// Master secret
// ---------------------------------------------------------------------------

/// The deployment-wide master secret.
///
/// - Not `Clone`. Share it through an `Arc` owned by application startup.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret {
    bytes: Vec<u8>,
}

impl MasterSecret {
    /// Construct from raw bytes. Fails if fewer than 32 bytes are given.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self, CryptoError> {
        check_secret_len(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Load the secret from a file holding one base64 line.
    ///
    /// A missing, unreadable, empty or malformed file is a configuration
    /// fault. The path is logged but not carried in the error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to open master secret");
            CryptoError::Config
        })?;

        let mut line = String::new();
        BufReader::new(file).read_line(&mut line).map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to read master secret");
            CryptoError::Config
        })?;

        let encoded = line.trim();
        if encoded.is_empty() {
            line.zeroize();
            error!(path = %path.display(), "master secret is empty");
            return Err(CryptoError::Config);
        }

        let decoded = STANDARD.decode(encoded);
        line.zeroize();
        let bytes = decoded.map_err(|e| {
            error!(path = %path.display(), error = %e, "master secret is not valid base64");
            CryptoError::Config
        })?;

        Self::from_bytes(bytes)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reject a secret shorter than `MIN_SECRET_LEN`, wiping it first.
fn check_secret_len(bytes: &mut Vec<u8>) -> Result<(), CryptoError> {
    if bytes.len() < MIN_SECRET_LEN {
        error!(len = bytes.len(), "master secret is too short");
        bytes.zeroize();
        return Err(CryptoError::Config);
    }
    Ok(())
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

// ---------------------------------------------------------------------------
// Stash parameters
// ---------------------------------------------------------------------------

/// Per-stash parameters, persisted by the caller as
/// `{"version": 1, "salt": "<base64>"}`.
///
/// Changing the salt of an existing stash silently invalidates every item
/// stored under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashParameters {
    pub version: u32,
    pub salt: String,
}

impl StashParameters {
    /// Generate fresh parameters with a random 32-byte salt.
    pub fn generate() -> Result<Self, CryptoError> {
        let salt = crypto::random_bytes::<MIN_SECRET_LEN>()?;
        Ok(Self {
            version: PARAMS_VERSION,
            salt: STANDARD.encode(salt),
        })
    }

    /// Parse parameters from their persisted JSON form.
    pub fn from_json(raw: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(raw).map_err(|e| {
            error!(error = %e, "stash parameters are not well formed");
            CryptoError::UnsupportedFormat("stash parameters".into())
        })
    }

    /// Serialize to the persisted JSON form.
    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string(self).map_err(|e| {
            error!(error = %e, "failed to serialize stash parameters");
            CryptoError::Operation("serialize stash parameters")
        })
    }

    /// Check the version and return the decoded salt.
    pub(crate) fn salt_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        if self.version != PARAMS_VERSION {
            error!(version = self.version, "unsupported stash parameters version");
            return Err(CryptoError::UnsupportedFormat(format!(
                "stash parameters version {}",
                self.version
            )));
        }

        let salt = STANDARD.decode(self.salt.trim()).map_err(|e| {
            error!(error = %e, "stash salt is not valid base64");
            CryptoError::Config
        })?;
        if salt.len() < MIN_SECRET_LEN {
            error!(len = salt.len(), "stash salt is too short");
            return Err(CryptoError::Config);
        }
        Ok(salt)
    }
}

// ---------------------------------------------------------------------------
// Derived material
// ---------------------------------------------------------------------------

/// The intermediate key bound to one (master secret, salt) pair.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Stage1Key {
    bytes: [u8; KEY_LEN],
}

impl Stage1Key {
    /// `HMAC-SHA256(key = salt, msg = master_secret)`.
    pub fn derive(master: &MasterSecret, params: &StashParameters) -> Result<Self, CryptoError> {
        let mut salt = params.salt_bytes()?;
        let bytes = crypto::hmac_sha256(&salt, &[master.as_bytes()]);
        salt.zeroize();
        Ok(Self { bytes })
    }

    /// Derive the password protecting the item stored at `reference`.
    pub fn item_password(&self, reference: &str) -> ItemPassword {
        let mut raw =
            crypto::hmac_sha256(&self.bytes, &[reference.as_bytes(), &[ITEM_PASSWORD_INFO][..]]);
        let encoded = STANDARD.encode(raw);
        raw.zeroize();
        ItemPassword(encoded)
    }
}

impl fmt::Debug for Stage1Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Stage1Key(..)")
    }
}

/// A base64 per-item passphrase. Zeroised on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ItemPassword(String);

impl ItemPassword {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for ItemPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ItemPassword(..)")
    }
}
