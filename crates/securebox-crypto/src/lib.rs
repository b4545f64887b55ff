//! securebox-crypto: local cryptography for SecureBox
//!
//! Files leave the machine signed by the sender and sealed for the receiver:
//!
//! ```text
//! plaintext → RSA sign (SHA-256) → signature || plaintext
//!           → AES-CBC (fresh key + IV) → RSA-OAEP wrap message key → envelope
//! ```
//!
//! Nothing here touches the network or the filesystem. The bundle store
//! encrypts its at-rest form with [`kdf::derive_key`] and [`cipher`].

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod pipeline;

pub use cipher::{KeySize, SymmetricKey};
pub use envelope::{seal, unseal, SealOptions, WireFormat};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, KdfParams};
pub use keys::{KeyPair, OaepHash, PublicKey, SignatureScheme};
pub use pipeline::{open_signed, protect, sign_only, unprotect};

/// AES block size; every IV is this long
pub const IV_LEN: usize = 16;

/// Random salt stored in front of an encrypted bundle
pub const SALT_LEN: usize = 32;

/// Smallest RSA modulus accepted for new identities
pub const MIN_RSA_BITS: usize = 1024;

/// Largest RSA modulus accepted (keeps generation time bounded)
pub const MAX_RSA_BITS: usize = 16384;

/// Modulus size for new identities when nothing else is configured
pub const DEFAULT_RSA_BITS: usize = 2048;
