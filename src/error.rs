//! Error types for cryptostash.
//!
//! There is a single error kind for every stash operation. Messages are
//! intentionally minimal: they say *what* failed and, where one is known,
//! which item reference was involved. Underlying library errors are logged
//! at the point of failure and never rendered into these messages.

use std::fmt;

/// Why an uploaded key or certificate was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadRejection {
    /// The upload exceeded the maximum accepted size.
    TooLarge { size: usize, limit: usize },

    /// The RSA modulus is shorter than the minimum accepted key size.
    KeyTooWeak { bits: u32, minimum: u32 },

    /// The upload is not a PEM encoded RSA private key.
    NotAValidKey,

    /// The upload is not a PEM encoded X.509 certificate.
    NotAValidCertificate,
}

impl fmt::Display for UploadRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { size, limit } => {
                write!(f, "upload too large ({} bytes, limit {})", size, limit)
            }
            Self::KeyTooWeak { bits, minimum } => {
                write!(f, "key size {} bits is below the minimum of {}", bits, minimum)
            }
            Self::NotAValidKey => write!(f, "not a valid key format"),
            Self::NotAValidCertificate => write!(f, "not a valid certificate format"),
        }
    }
}

/// The single error type for all cryptostash operations.
#[derive(Debug)]
pub enum CryptoError {
    /// The master secret or stash parameters could not be loaded. Details are
    /// logged; the rendered message carries none of them.
    Config,

    /// An operation was attempted before `init_params` succeeded.
    NotInitialised,

    /// Persisted stash parameters have an unknown version or shape.
    UnsupportedFormat(String),

    /// Persisted item metadata is missing fields or points outside the stash.
    InvalidMetadata(String),

    /// Every attempt at allocating a fresh reference collided.
    ReferenceExhausted,

    /// An operation on a specific stash item failed.
    Item {
        reference: String,
        action: &'static str,
    },

    /// A cryptographic operation not tied to a stored item failed.
    Operation(&'static str),

    /// An uploaded key or certificate was refused.
    Upload(UploadRejection),

    /// An object store request failed.
    Storage { object: String },

    /// No account-level temporary URL key is configured.
    TempUrlKeyMissing,

    /// The system's random number generator failed to produce bytes.
    Randomness,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "crypto stash internal fault"),
            Self::NotInitialised => write!(f, "crypto stash not initialised"),
            Self::UnsupportedFormat(what) => write!(f, "unsupported format: {}", what),
            Self::InvalidMetadata(why) => write!(f, "invalid item metadata: {}", why),
            Self::ReferenceExhausted => write!(f, "unable to generate unique reference"),
            Self::Item { reference, action } => {
                write!(f, "failed to {} item with ref: {}", action, reference)
            }
            Self::Operation(action) => write!(f, "failed to {}", action),
            Self::Upload(why) => write!(f, "upload rejected: {}", why),
            Self::Storage { object } => write!(f, "object store request failed for: {}", object),
            Self::TempUrlKeyMissing => {
                write!(f, "temporary URL key not configured in object store")
            }
            Self::Randomness => write!(f, "randomness source failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<UploadRejection> for CryptoError {
    fn from(why: UploadRejection) -> Self {
        Self::Upload(why)
    }
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_fault_hides_detail() {
        assert_eq!(CryptoError::Config.to_string(), "crypto stash internal fault");
    }

    #[test]
    fn item_fault_names_reference() {
        let err = CryptoError::Item {
            reference: "stash/abc".into(),
            action: "decrypt",
        };
        assert_eq!(err.to_string(), "failed to decrypt item with ref: stash/abc");
    }
}
