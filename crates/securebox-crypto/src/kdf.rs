//! Key derivation: Argon2id password → bundle encryption key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::cipher::SymmetricKey;
use crate::error::{CryptoError, CryptoResult};

/// Size of the derived key in bytes (AES-256)
pub const DERIVED_KEY_LEN: usize = 32;

/// Argon2id parameters for KDF
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Derive a 256-bit key from a password and salt using Argon2id.
///
/// The salt is random per write and stored in clear next to the ciphertext.
pub fn derive_key(
    password: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<SymmetricKey> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(|e| CryptoError::Primitive(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key[..])
        .map_err(|e| CryptoError::Primitive(format!("Argon2id KDF failed: {e}")))?;

    SymmetricKey::from_bytes(&key[..])
}
