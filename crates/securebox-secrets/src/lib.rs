//! securebox-secrets: the user's credential bundle
//!
//! A bundle holds the server token, the user id and the RSA identity. It
//! lives in the bundle directory in exactly one of two forms:
//!
//! ```text
//! bundle.toml   plain, human-editable, [securebox] table
//! bundle.enc    salt(32) || iv(16) || AES-256-CBC(JSON field map)
//!               key = Argon2id(password, salt)
//! ```

pub mod bundle;
pub mod error;
pub mod prompt;

pub use bundle::{Bundle, BundleStore, LockedBundle, Opened, ENCRYPTED_FILE, PLAIN_FILE};
pub use error::{BundleError, BundleResult};
