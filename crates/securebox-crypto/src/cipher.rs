//! AES-CBC with PKCS#7 padding for arbitrary-length payloads
//!
//! Every call to [`encrypt`] draws a fresh key and IV from the OS-seeded
//! thread RNG; [`encrypt_with_key`] draws a fresh IV for a caller-held key.

use aes::cipher::{
    block_padding::Pkcs7, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::IV_LEN;

/// AES key length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySize {
    Aes128,
    Aes192,
    #[default]
    Aes256,
}

impl KeySize {
    pub fn from_bits(bits: usize) -> CryptoResult<Self> {
        match bits {
            128 => Ok(Self::Aes128),
            192 => Ok(Self::Aes192),
            256 => Ok(Self::Aes256),
            other => Err(CryptoError::InvalidKeySize(other)),
        }
    }

    pub fn from_len(len: usize) -> CryptoResult<Self> {
        Self::from_bits(len * 8)
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }
}

/// A symmetric message key. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl SymmetricKey {
    pub fn generate(size: KeySize) -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; size.bytes()]);
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        KeySize::from_len(bytes.len())?;
        Ok(Self {
            bytes: Zeroizing::new(bytes.to_vec()),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> KeySize {
        // length validated at construction
        KeySize::from_len(self.bytes.len()).unwrap_or_default()
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bits", &(self.bytes.len() * 8))
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Output of [`encrypt`]: the fresh key, the IV, and the padded ciphertext.
#[derive(Debug)]
pub struct Encrypted {
    pub key: SymmetricKey,
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

/// Encrypt under a freshly generated key and IV.
pub fn encrypt(plaintext: &[u8], size: KeySize) -> CryptoResult<Encrypted> {
    let key = SymmetricKey::generate(size);
    let (iv, ciphertext) = encrypt_with_key(&key, plaintext)?;
    Ok(Encrypted {
        key,
        iv,
        ciphertext,
    })
}

/// Encrypt under `key` with a freshly generated IV.
pub fn encrypt_with_key(
    key: &SymmetricKey,
    plaintext: &[u8],
) -> CryptoResult<([u8; IV_LEN], Vec<u8>)> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = match key.size() {
        KeySize::Aes128 => cbc_encrypt::<aes::Aes128>(key.as_bytes(), &iv, plaintext),
        KeySize::Aes192 => cbc_encrypt::<aes::Aes192>(key.as_bytes(), &iv, plaintext),
        KeySize::Aes256 => cbc_encrypt::<aes::Aes256>(key.as_bytes(), &iv, plaintext),
    }?;
    Ok((iv, ciphertext))
}

/// Decrypt and strip PKCS#7 padding.
///
/// Inconsistent padding (the usual symptom of a wrong key) and ciphertext
/// that is not a whole number of blocks both yield [`CryptoError::BadPadding`].
pub fn decrypt(key: &SymmetricKey, iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::BadPadding);
    }
    match key.size() {
        KeySize::Aes128 => cbc_decrypt::<aes::Aes128>(key.as_bytes(), iv, ciphertext),
        KeySize::Aes192 => cbc_decrypt::<aes::Aes192>(key.as_bytes(), iv, ciphertext),
        KeySize::Aes256 => cbc_decrypt::<aes::Aes256>(key.as_bytes(), iv, ciphertext),
    }
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let enc = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| CryptoError::Primitive(format!("AES-CBC init failed: {e}")))?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let dec = cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|_| CryptoError::BadPadding)?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::BadPadding)
}
