//! Temporary URL signing.
//!
//! Produces time-limited retrieval links that the object store verifies
//! itself, so a booting VM can fetch one stash blob without credentials.
//!
//! ```text
//! sig = hex(HMAC-SHA1(account_key, "GET\n{expires}\n{path}"))
//! url = {public_url}?temp_url_sig={sig}&temp_url_expires={expires}
//! ```
//!
//! The signing key lives in the account metadata header
//! `X-Account-Meta-Temp-URL-Key`. Some backends accept that header but do
//! not report it back straight away, so provisioning also writes the key to
//! a fallback object in the tenant container.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;
use crate::error::CryptoError;
use crate::store::{self, AccountHeaders, ObjectStore};

/// Account metadata header carrying the signing key.
pub const TEMP_URL_KEY_HEADER: &str = "X-Account-Meta-Temp-URL-Key";

/// Fallback object holding a copy of the signing key.
pub const TEMP_URL_KEY_OBJECT: &str = "temp-url-key";

/// Path prefix a gateway adds in front of the Swift API. Signatures are
/// computed over the path without it.
const GATEWAY_PREFIX: &str = "/swift";

/// Signs temporary URLs with the account key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TempUrlSigner {
    secret: String,
}

impl TempUrlSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Build a signer from the key configured on the account.
    pub fn from_store<S: ObjectStore + ?Sized>(
        store: &S,
        container: &str,
    ) -> Result<Self, CryptoError> {
        load_temp_url_key(store, container)?
            .map(Self::new)
            .ok_or(CryptoError::TempUrlKeyMissing)
    }

    /// Signature for `path` expiring at `expires` (unix seconds).
    pub fn signature(&self, path: &str, expires: i64) -> String {
        let data = format!("GET\n{}\n{}", expires, signing_path(path));
        debug!(data = ?data, "temporary URL signing input");
        crypto::hmac_sha1_hex(self.secret.as_bytes(), data.as_bytes())
    }

    /// Sign `url` so that it stays valid until `expires`.
    pub fn sign_url_until(&self, url: &Url, expires: i64) -> Url {
        let sig = self.signature(url.path(), expires);
        let mut signed = url.clone();
        signed.set_fragment(None);
        signed
            .query_pairs_mut()
            .clear()
            .append_pair("temp_url_sig", &sig)
            .append_pair("temp_url_expires", &expires.to_string());
        signed
    }

    /// Sign `url` so that it stays valid for `ttl_secs` from now.
    pub fn sign_url(&self, url: &Url, ttl_secs: u64) -> Url {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl);
        self.sign_url_until(url, expires)
    }
}

impl fmt::Debug for TempUrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TempUrlSigner(..)")
    }
}

/// Strip the gateway prefix so the path matches what the backend signs.
fn signing_path(path: &str) -> &str {
    match path.strip_prefix(GATEWAY_PREFIX) {
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Look up the signing key: account header first, then the fallback object.
pub fn load_temp_url_key<S: ObjectStore + ?Sized>(
    store: &S,
    container: &str,
) -> Result<Option<String>, CryptoError> {
    let headers = store
        .head_account()
        .map_err(|e| store::storage_fault(container, "<account>", "head_account", e))?;
    if let Some((_, value)) = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(TEMP_URL_KEY_HEADER))
    {
        return Ok(Some(value.clone()));
    }

    let present = store
        .exists(container, TEMP_URL_KEY_OBJECT)
        .map_err(|e| store::storage_fault(container, TEMP_URL_KEY_OBJECT, "exists", e))?;
    if !present {
        return Ok(None);
    }

    let object = store
        .get(container, TEMP_URL_KEY_OBJECT)
        .map_err(|e| store::storage_fault(container, TEMP_URL_KEY_OBJECT, "get", e))?;
    let secret = String::from_utf8(object.data).map_err(|_| {
        error!(container, "temporary URL key object is not UTF-8");
        CryptoError::Config
    })?;
    Ok(Some(secret.trim().to_string()))
}

/// Generate a new account signing key and install it.
///
/// When the account does not report the header back, the key is also
/// written to the fallback object in `container`.
pub fn provision_temp_url_key<S: ObjectStore + ?Sized>(
    store: &S,
    container: &str,
) -> Result<TempUrlSigner, CryptoError> {
    let secret = STANDARD.encode(crypto::random_bytes::<32>()?);

    let mut headers = AccountHeaders::new();
    headers.insert(TEMP_URL_KEY_HEADER.to_string(), secret.clone());
    store
        .post_account(&headers)
        .map_err(|e| store::storage_fault(container, "<account>", "post_account", e))?;
    info!(container, "installed temporary URL key");

    let reported = store
        .head_account()
        .map_err(|e| store::storage_fault(container, "<account>", "head_account", e))?
        .keys()
        .any(|name| name.eq_ignore_ascii_case(TEMP_URL_KEY_HEADER));
    if !reported {
        warn!(container, "account did not report temporary URL key, writing fallback object");
        store
            .put(container, TEMP_URL_KEY_OBJECT, secret.as_bytes(), "text/plain")
            .map_err(|e| store::storage_fault(container, TEMP_URL_KEY_OBJECT, "put", e))?;
    }

    Ok(TempUrlSigner::new(secret))
}
