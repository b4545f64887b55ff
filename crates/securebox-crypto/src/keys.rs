//! RSA identity keys: generation, PEM encoding, signatures, key wrapping

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::{MAX_RSA_BITS, MIN_RSA_BITS};

/// Signature padding scheme. Both hash the message with SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// RSASSA-PKCS1-v1_5
    Pkcs1v15,
    /// RSASSA-PSS, randomized salt
    Pss,
}

/// Hash used inside OAEP when wrapping message keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OaepHash {
    Sha1,
    Sha256,
}

impl OaepHash {
    fn padding(self) -> Oaep {
        match self {
            OaepHash::Sha1 => Oaep::new::<sha1::Sha1>(),
            OaepHash::Sha256 => Oaep::new::<Sha256>(),
        }
    }
}

/// The public half of an identity.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PublicKey {
    /// Parse a PEM public key (SPKI `PUBLIC KEY` or PKCS#1 `RSA PUBLIC KEY`).
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let pem = pem.trim();
        let inner = if pem.contains("BEGIN RSA PUBLIC KEY") {
            RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        } else {
            RsaPublicKey::from_public_key_pem(pem)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        };
        Ok(Self { inner })
    }

    /// SPKI PEM encoding
    pub fn to_pem(&self) -> CryptoResult<String> {
        self.inner
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Modulus size in bytes. Signatures and wrapped keys have exactly this length.
    pub fn size_in_bytes(&self) -> usize {
        self.inner.size()
    }

    /// Short hex fingerprint (SHA-256 of the DER encoding) for display.
    pub fn fingerprint(&self) -> String {
        let der = self
            .inner
            .to_public_key_der()
            .map(|d| d.as_bytes().to_vec())
            .unwrap_or_default();
        Sha256::digest(&der)
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Check `signature` over SHA-256(`message`).
    pub fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        scheme: SignatureScheme,
    ) -> CryptoResult<()> {
        if signature.len() != self.size_in_bytes() {
            return Err(CryptoError::SignatureInvalid);
        }
        let digest = Sha256::digest(message);
        let result = match scheme {
            SignatureScheme::Pkcs1v15 => {
                self.inner
                    .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            }
            SignatureScheme::Pss => self.inner.verify(Pss::new::<Sha256>(), &digest, signature),
        };
        result.map_err(|_| CryptoError::SignatureInvalid)
    }

    /// RSA-OAEP encrypt a short secret (message key) for this key's owner.
    pub(crate) fn wrap(&self, secret: &[u8], hash: OaepHash) -> CryptoResult<Vec<u8>> {
        self.inner
            .encrypt(&mut rand::thread_rng(), hash.padding(), secret)
            .map_err(|e| CryptoError::Primitive(format!("key wrapping failed: {e}")))
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &(self.size_in_bytes() * 8))
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// An RSA identity. The private half may be absent, e.g. when the pair was
/// loaded from a public PEM or after [`KeyPair::forget_private`].
///
/// `RsaPrivateKey` zeroizes its components on drop.
#[derive(Clone)]
pub struct KeyPair {
    public: PublicKey,
    private: Option<RsaPrivateKey>,
}

impl KeyPair {
    /// Generate a fresh key pair with a modulus of `bits` bits.
    pub fn generate(bits: usize) -> CryptoResult<Self> {
        if bits < MIN_RSA_BITS {
            return Err(CryptoError::KeyTooSmall {
                bits,
                min: MIN_RSA_BITS,
            });
        }
        if bits > MAX_RSA_BITS || bits % 8 != 0 {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported RSA modulus size: {bits} bits"
            )));
        }
        tracing::debug!(bits, "generating RSA key pair");
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| CryptoError::Primitive(format!("RSA key generation failed: {e}")))?;
        Ok(Self::from_private(private))
    }

    fn from_private(private: RsaPrivateKey) -> Self {
        let public = PublicKey {
            inner: private.to_public_key(),
        };
        Self {
            public,
            private: Some(private),
        }
    }

    /// Parse a PEM key. Private keys may be PKCS#8 (`PRIVATE KEY`) or PKCS#1
    /// (`RSA PRIVATE KEY`); a public PEM yields a pair without private half.
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let pem = pem.trim();
        if pem.contains("BEGIN ENCRYPTED PRIVATE KEY") {
            return Err(CryptoError::InvalidKey(
                "password-protected PEM keys are not supported".into(),
            ));
        }
        if pem.contains("BEGIN RSA PRIVATE KEY") {
            let private = RsaPrivateKey::from_pkcs1_pem(pem)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            return Ok(Self::from_private(private));
        }
        if pem.contains("BEGIN PRIVATE KEY") {
            let private = RsaPrivateKey::from_pkcs8_pem(pem)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            return Ok(Self::from_private(private));
        }
        Ok(Self {
            public: PublicKey::from_pem(pem)?,
            private: None,
        })
    }

    /// PKCS#8 PEM encoding of the private key.
    pub fn to_pem(&self) -> CryptoResult<Zeroizing<String>> {
        self.private_key()?
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    /// Drop the private half now instead of waiting for the pair to go out of scope.
    pub fn forget_private(&mut self) {
        self.private = None;
    }

    pub fn size_in_bytes(&self) -> usize {
        self.public.size_in_bytes()
    }

    /// Sign SHA-256(`message`). The signature is `size_in_bytes()` long.
    pub fn sign(&self, message: &[u8], scheme: SignatureScheme) -> CryptoResult<Vec<u8>> {
        let private = self.private_key()?;
        let digest = Sha256::digest(message);
        let signature = match scheme {
            SignatureScheme::Pkcs1v15 => private.sign(Pkcs1v15Sign::new::<Sha256>(), &digest),
            SignatureScheme::Pss => {
                private.sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &digest)
            }
        };
        signature.map_err(|e| CryptoError::Primitive(format!("signing failed: {e}")))
    }

    /// RSA-OAEP decrypt a wrapped message key. Blinded against timing attacks.
    pub(crate) fn unwrap(&self, wrapped: &[u8], hash: OaepHash) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let private = self.private_key()?;
        private
            .decrypt_blinded(&mut rand::thread_rng(), hash.padding(), wrapped)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::UnwrapFailed)
    }

    fn private_key(&self) -> CryptoResult<&RsaPrivateKey> {
        self.private.as_ref().ok_or(CryptoError::KeyUnavailable)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("private", &self.private.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
