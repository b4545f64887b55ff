use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Local cryptographic failures.
///
/// Every variant is final: retrying with the same input cannot succeed.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RSA private key not available")]
    KeyUnavailable,

    #[error("the signature is not authentic")]
    SignatureInvalid,

    #[error("invalid padding: wrong key or corrupted ciphertext")]
    BadPadding,

    #[error("could not unwrap the message key: wrong private key or truncated envelope")]
    UnwrapFailed,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("RSA key of {bits} bits is too small (minimum {min})")]
    KeyTooSmall { bits: usize, min: usize },

    #[error("unsupported symmetric key size: {0} bits (expected 128, 192 or 256)")]
    InvalidKeySize(usize),

    #[error("{0}")]
    Primitive(String),
}
