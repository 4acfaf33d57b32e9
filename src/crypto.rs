//! Low-level primitives.
//!
//! This module is the only place in the crate that imports `ring`. Key
//! derivation (`keys`) and temporary URL signing (`tempurl`) go through the
//! functions exposed here. RSA and X.509 work lives in `item`, on `openssl`.
//!
//! Primitive choices:
//! - **Derivation MAC**: HMAC-SHA256, 256-bit output
//! - **Temp URL MAC**: HMAC-SHA1, dictated by the object store's signing convention
//! - **Randomness**: `ring::rand::SystemRandom`

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::CryptoError;

/// Size of an HMAC-SHA256 output and of every derived key in bytes.
pub const KEY_LEN: usize = 32;

/// Compute HMAC-SHA256 over the concatenation of `parts`.
///
/// Taking the message in parts lets callers append a domain byte without
/// building an intermediate buffer.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; KEY_LEN] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let mut ctx = hmac::Context::with_key(&key);
    for part in parts {
        ctx.update(part);
    }

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(ctx.sign().as_ref());
    out
}

/// Compute HMAC-SHA1 and return it as lowercase hex.
pub fn hmac_sha1_hex(key: &[u8], message: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hex::encode(hmac::sign(&key, message).as_ref())
}

/// Fill a fixed-size buffer from the system RNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; N];
    rng.fill(&mut buf).map_err(|_| CryptoError::Randomness)?;
    Ok(buf)
}
