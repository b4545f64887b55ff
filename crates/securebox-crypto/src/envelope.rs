//! Hybrid envelope: AES-CBC payload, message key wrapped with RSA-OAEP
//!
//! Legacy layout (no header, segment lengths implied by the receiver key):
//! ```text
//! [16 bytes: IV][k bytes: wrapped key, k = receiver modulus bytes][N bytes: ciphertext]
//! ```
//!
//! Framed layout, version 1 (default):
//! ```text
//! ["SB"][0x01][u16 BE: wrapped_len][16 bytes: IV][wrapped_len bytes: wrapped key][N bytes: ciphertext]
//! ```

use std::fmt;
use std::str::FromStr;

use crate::cipher::{self, KeySize, SymmetricKey};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeyPair, OaepHash, PublicKey, SignatureScheme};
use crate::IV_LEN;

/// Magic bytes opening a framed envelope
pub const FRAME_MAGIC: [u8; 2] = *b"SB";

/// Current framed envelope version
pub const FRAME_VERSION: u8 = 1;

/// magic (2) + version (1) + wrapped_len (2)
pub const FRAME_HEADER_LEN: usize = 5;

/// How envelopes and signed payloads are laid out on the wire.
///
/// Both ends must agree on the format out of band; envelopes carry no
/// indication of which one produced them beyond the framed magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Headerless layout; PKCS#1 v1.5 signatures, OAEP with SHA-1
    Legacy,
    /// Length-prefixed layout; PSS signatures, OAEP with SHA-256
    #[default]
    Framed,
}

impl WireFormat {
    pub fn signature_scheme(self) -> SignatureScheme {
        match self {
            WireFormat::Legacy => SignatureScheme::Pkcs1v15,
            WireFormat::Framed => SignatureScheme::Pss,
        }
    }

    pub fn oaep_hash(self) -> OaepHash {
        match self {
            WireFormat::Legacy => OaepHash::Sha1,
            WireFormat::Framed => OaepHash::Sha256,
        }
    }
}

impl FromStr for WireFormat {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(WireFormat::Legacy),
            "framed" => Ok(WireFormat::Framed),
            other => Err(CryptoError::Primitive(format!(
                "unknown envelope format '{other}' (expected 'framed' or 'legacy')"
            ))),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WireFormat::Legacy => "legacy",
            WireFormat::Framed => "framed",
        })
    }
}

/// Sender-side parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SealOptions {
    pub format: WireFormat,
    pub key_size: KeySize,
}

/// Borrowed view of an envelope's three segments
struct Segments<'a> {
    iv: &'a [u8],
    wrapped_key: &'a [u8],
    ciphertext: &'a [u8],
}

/// Encrypt `message` so only the holder of `receiver`'s private key can read it.
pub fn seal(message: &[u8], receiver: &PublicKey, opts: &SealOptions) -> CryptoResult<Vec<u8>> {
    let encrypted = cipher::encrypt(message, opts.key_size)?;
    let wrapped = receiver.wrap(encrypted.key.as_bytes(), opts.format.oaep_hash())?;

    let header_len = match opts.format {
        WireFormat::Legacy => 0,
        WireFormat::Framed => FRAME_HEADER_LEN,
    };
    let mut out =
        Vec::with_capacity(header_len + IV_LEN + wrapped.len() + encrypted.ciphertext.len());

    if opts.format == WireFormat::Framed {
        let wrapped_len = u16::try_from(wrapped.len()).map_err(|_| {
            CryptoError::InvalidKey(format!("wrapped key too long: {} bytes", wrapped.len()))
        })?;
        out.extend_from_slice(&FRAME_MAGIC);
        out.push(FRAME_VERSION);
        out.extend_from_slice(&wrapped_len.to_be_bytes());
    }
    out.extend_from_slice(&encrypted.iv);
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&encrypted.ciphertext);
    Ok(out)
}

/// Inverse of [`seal`].
///
/// A wrapped-key segment that is missing, truncated or encrypted for another
/// key yields [`CryptoError::UnwrapFailed`]; a payload whose padding does not
/// check out yields [`CryptoError::BadPadding`].
pub fn unseal(envelope: &[u8], receiver: &KeyPair, format: WireFormat) -> CryptoResult<Vec<u8>> {
    if !receiver.has_private() {
        return Err(CryptoError::KeyUnavailable);
    }
    let segments = split(envelope, receiver.size_in_bytes(), format)?;

    let key_bytes = receiver.unwrap(segments.wrapped_key, format.oaep_hash())?;
    let key = SymmetricKey::from_bytes(&key_bytes).map_err(|_| CryptoError::UnwrapFailed)?;

    cipher::decrypt(&key, segments.iv, segments.ciphertext)
}

fn split(envelope: &[u8], key_len: usize, format: WireFormat) -> CryptoResult<Segments<'_>> {
    let (body, wrapped_len) = match format {
        WireFormat::Legacy => (envelope, key_len),
        WireFormat::Framed => {
            if envelope.len() < FRAME_HEADER_LEN {
                tracing::debug!(len = envelope.len(), "envelope shorter than frame header");
                return Err(CryptoError::UnwrapFailed);
            }
            let (header, body) = envelope.split_at(FRAME_HEADER_LEN);
            if header[..2] != FRAME_MAGIC || header[2] != FRAME_VERSION {
                tracing::debug!("envelope header not recognised");
                return Err(CryptoError::UnwrapFailed);
            }
            let wrapped_len = u16::from_be_bytes([header[3], header[4]]) as usize;
            if wrapped_len != key_len {
                tracing::debug!(
                    wrapped_len,
                    key_len,
                    "envelope was sealed for a key of a different size"
                );
                return Err(CryptoError::UnwrapFailed);
            }
            (body, wrapped_len)
        }
    };

    if body.len() < IV_LEN + wrapped_len {
        tracing::debug!(len = envelope.len(), "envelope truncated");
        return Err(CryptoError::UnwrapFailed);
    }
    let (iv, rest) = body.split_at(IV_LEN);
    let (wrapped_key, ciphertext) = rest.split_at(wrapped_len);
    Ok(Segments {
        iv,
        wrapped_key,
        ciphertext,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::fixtures::{alice, bob, carol};

    const FORMATS: [WireFormat; 2] = [WireFormat::Legacy, WireFormat::Framed];

    fn opts(format: WireFormat) -> SealOptions {
        SealOptions {
            format,
            key_size: KeySize::Aes256,
        }
    }

    #[test]
    fn test_roundtrip_sizes() {
        for format in FORMATS {
            for len in [0usize, 1, 15, 16, 17, 4096] {
                let message: Vec<u8> = (0..len).map(|i| (i * 31) as u8).collect();
                let env = seal(&message, bob().public(), &opts(format)).unwrap();
                let out = unseal(&env, bob(), format).unwrap();
                assert_eq!(out, message, "format={format} len={len}");
            }
        }
    }

    #[test]
    fn test_legacy_layout() {
        let env = seal(b"hello", bob().public(), &opts(WireFormat::Legacy)).unwrap();
        // IV + wrapped key + one padded block
        assert_eq!(env.len(), IV_LEN + bob().size_in_bytes() + 16);
    }

    #[test]
    fn test_framed_layout() {
        let env = seal(b"hello", bob().public(), &opts(WireFormat::Framed)).unwrap();
        assert_eq!(&env[..2], b"SB");
        assert_eq!(env[2], FRAME_VERSION);
        let wrapped_len = u16::from_be_bytes([env[3], env[4]]) as usize;
        assert_eq!(wrapped_len, bob().size_in_bytes());
        assert_eq!(env.len(), FRAME_HEADER_LEN + IV_LEN + wrapped_len + 16);
    }

    #[test]
    fn test_small_symmetric_keys_roundtrip() {
        for key_size in [KeySize::Aes128, KeySize::Aes192] {
            let o = SealOptions {
                format: WireFormat::Framed,
                key_size,
            };
            let env = seal(b"payload", bob().public(), &o).unwrap();
            assert_eq!(unseal(&env, bob(), WireFormat::Framed).unwrap(), b"payload");
        }
    }

    #[test]
    fn test_wrong_receiver_rejected() {
        for format in FORMATS {
            let env = seal(b"for bob only", bob().public(), &opts(format)).unwrap();
            let result = unseal(&env, carol(), format);
            assert!(
                matches!(result, Err(CryptoError::UnwrapFailed | CryptoError::BadPadding)),
                "format={format}"
            );
        }
    }

    #[test]
    fn test_truncated_envelope_is_unwrap_failed() {
        for format in FORMATS {
            let env = seal(b"data", bob().public(), &opts(format)).unwrap();
            for cut in [0usize, 3, 10, 40] {
                let result = unseal(&env[..cut], bob(), format);
                assert!(matches!(result, Err(CryptoError::UnwrapFailed)), "cut={cut}");
            }
        }
    }

    #[test]
    fn test_framed_header_corruption() {
        let env = seal(b"data", bob().public(), &opts(WireFormat::Framed)).unwrap();

        let mut bad_magic = env.clone();
        bad_magic[0] ^= 0x01;
        assert!(matches!(
            unseal(&bad_magic, bob(), WireFormat::Framed),
            Err(CryptoError::UnwrapFailed)
        ));

        let mut bad_len = env.clone();
        bad_len[4] ^= 0x01;
        assert!(matches!(
            unseal(&bad_len, bob(), WireFormat::Framed),
            Err(CryptoError::UnwrapFailed)
        ));
    }

    #[test]
    fn test_format_mismatch_rejected() {
        let env = seal(b"data", bob().public(), &opts(WireFormat::Legacy)).unwrap();
        assert!(unseal(&env, bob(), WireFormat::Framed).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_is_bad_padding() {
        let env = seal(b"0123456789abcdef-more", bob().public(), &opts(WireFormat::Legacy)).unwrap();
        let result = unseal(&env[..env.len() - 1], bob(), WireFormat::Legacy);
        assert!(matches!(result, Err(CryptoError::BadPadding)));
    }

    #[test]
    fn test_public_only_receiver_is_key_unavailable() {
        let env = seal(b"x", alice().public(), &opts(WireFormat::Framed)).unwrap();
        let mut public_only = alice().clone();
        public_only.forget_private();
        assert!(matches!(
            unseal(&env, &public_only, WireFormat::Framed),
            Err(CryptoError::KeyUnavailable)
        ));
    }

    #[test]
    fn test_wire_format_parse() {
        assert_eq!("framed".parse::<WireFormat>().unwrap(), WireFormat::Framed);
        assert_eq!(" Legacy ".parse::<WireFormat>().unwrap(), WireFormat::Legacy);
        assert!("v2".parse::<WireFormat>().is_err());
        assert_eq!(WireFormat::default().to_string(), "framed");
    }
}
