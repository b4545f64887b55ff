use std::path::PathBuf;

use securebox_crypto::CryptoError;
use thiserror::Error;

pub type BundleResult<T> = Result<T, BundleError>;

#[derive(Debug, Error)]
pub enum BundleError {
    /// Wrong password, corrupted file or mismatched KDF parameters. These are
    /// indistinguishable once decrypted, so they share one variant.
    #[error("incorrect password")]
    IncorrectPassword,

    #[error("malformed bundle {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("bundle has no {0}; create an identity first")]
    MissingField(&'static str),

    #[error("bundle I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl BundleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BundleError::Io {
            path: path.into(),
            source,
        }
    }
}
