use std::path::PathBuf;

use securebox_api::ApiError;
use securebox_crypto::CryptoError;
use securebox_secrets::BundleError;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

/// Everything a session operation can fail with.
///
/// Local cryptographic and bundle failures are final. Only transport
/// failures talking to the directory are worth retrying.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    /// A `.crypt` file was opened without naming who signed it.
    #[error("{0} is signed; the sender's user id is needed to open it")]
    SignerRequired(PathBuf),

    #[error("background task failed: {0}")]
    Task(String),
}

impl ClientError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ClientError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Api(e) if e.is_transport())
    }
}
