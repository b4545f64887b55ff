//! Sign-then-seal: the authenticated form in which files are exchanged
//!
//! The signed payload is the sender's signature over the plaintext joined to
//! the plaintext itself. Legacy puts the signature first with its length
//! implied by the sender key; framed prefixes it with a u16 BE length.
//! The signed payload is then sealed for the receiver.

use crate::envelope::{self, SealOptions, WireFormat};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeyPair, PublicKey};

/// Sign `plaintext` with the sender's private key and seal the result for `receiver`.
pub fn protect(
    plaintext: &[u8],
    sender: &KeyPair,
    receiver: &PublicKey,
    opts: &SealOptions,
) -> CryptoResult<Vec<u8>> {
    let signed = sign_only(plaintext, sender, opts.format)?;
    envelope::seal(&signed, receiver, opts)
}

/// Unseal with the receiver's private key and check the sender's signature.
///
/// Returns the plaintext only when the signature verifies. Any failure to
/// split the inner payload counts as an invalid signature.
pub fn unprotect(
    envelope: &[u8],
    receiver: &KeyPair,
    sender: &PublicKey,
    format: WireFormat,
) -> CryptoResult<Vec<u8>> {
    let signed = envelope::unseal(envelope, receiver, format)?;
    open_signed(&signed, sender, format)
}

/// Build the signed payload without sealing it.
pub fn sign_only(plaintext: &[u8], sender: &KeyPair, format: WireFormat) -> CryptoResult<Vec<u8>> {
    let signature = sender.sign(plaintext, format.signature_scheme())?;

    let mut out = Vec::with_capacity(2 + signature.len() + plaintext.len());
    if format == WireFormat::Framed {
        let sig_len = u16::try_from(signature.len()).map_err(|_| {
            CryptoError::InvalidKey(format!("signature too long: {} bytes", signature.len()))
        })?;
        out.extend_from_slice(&sig_len.to_be_bytes());
    }
    out.extend_from_slice(&signature);
    out.extend_from_slice(plaintext);
    Ok(out)
}

/// Verify a signed payload against `sender` and return the message it carries.
pub fn open_signed(signed: &[u8], sender: &PublicKey, format: WireFormat) -> CryptoResult<Vec<u8>> {
    let (signature, message) = split_signed(signed, sender.size_in_bytes(), format)?;
    sender.verify(message, signature, format.signature_scheme())?;
    Ok(message.to_vec())
}

fn split_signed(signed: &[u8], sig_len: usize, format: WireFormat) -> CryptoResult<(&[u8], &[u8])> {
    let body = match format {
        WireFormat::Legacy => signed,
        WireFormat::Framed => {
            if signed.len() < 2 {
                return Err(CryptoError::SignatureInvalid);
            }
            let declared = u16::from_be_bytes([signed[0], signed[1]]) as usize;
            if declared != sig_len {
                tracing::debug!(declared, sig_len, "signature length does not match sender key");
                return Err(CryptoError::SignatureInvalid);
            }
            &signed[2..]
        }
    };
    if body.len() < sig_len {
        return Err(CryptoError::SignatureInvalid);
    }
    Ok(body.split_at(sig_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::KeySize;
    use crate::keys::fixtures::{alice, bob, carol, dave};

    const FORMATS: [WireFormat; 2] = [WireFormat::Legacy, WireFormat::Framed];

    fn opts(format: WireFormat) -> SealOptions {
        SealOptions {
            format,
            key_size: KeySize::Aes256,
        }
    }

    #[test]
    fn test_protect_unprotect_roundtrip() {
        for format in FORMATS {
            let env = protect(b"quarterly report", alice(), bob().public(), &opts(format)).unwrap();
            let out = unprotect(&env, bob(), alice().public(), format).unwrap();
            assert_eq!(out, b"quarterly report");
        }
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        for format in FORMATS {
            let env = protect(b"", alice(), bob().public(), &opts(format)).unwrap();
            assert!(unprotect(&env, bob(), alice().public(), format).unwrap().is_empty());
        }
    }

    #[test]
    fn test_mixed_key_sizes_roundtrip() {
        assert_eq!(alice().size_in_bytes(), 128);
        assert_eq!(dave().size_in_bytes(), 256);
        for format in FORMATS {
            // small sender, large receiver
            let env = protect(b"hello world", alice(), dave().public(), &opts(format)).unwrap();
            let out = unprotect(&env, dave(), alice().public(), format).unwrap();
            assert_eq!(out, b"hello world", "format={format}");

            // large sender, small receiver
            let env = protect(b"hello world", dave(), alice().public(), &opts(format)).unwrap();
            let out = unprotect(&env, alice(), dave().public(), format).unwrap();
            assert_eq!(out, b"hello world", "format={format}");
        }
    }

    #[test]
    fn test_mixed_key_sizes_detect_tampering() {
        for format in FORMATS {
            for (sender, receiver) in [(alice(), dave()), (dave(), alice())] {
                let mut env =
                    protect(b"hello world", sender, receiver.public(), &opts(format)).unwrap();
                env[20] ^= 0x01;
                let result = unprotect(&env, receiver, sender.public(), format);
                assert!(
                    matches!(
                        result,
                        Err(CryptoError::UnwrapFailed
                            | CryptoError::BadPadding
                            | CryptoError::SignatureInvalid)
                    ),
                    "format={format}: {result:?}"
                );
            }
        }
    }

    #[test]
    fn test_framed_signature_length_follows_sender() {
        let opts = opts(WireFormat::Framed);
        let signed = sign_only(b"m", dave(), WireFormat::Framed).unwrap();
        assert_eq!(u16::from_be_bytes([signed[0], signed[1]]), 256);

        let env = protect(b"m", dave(), alice().public(), &opts).unwrap();
        let inner = envelope::unseal(&env, alice(), WireFormat::Framed).unwrap();
        assert_eq!(u16::from_be_bytes([inner[0], inner[1]]), 256);
        assert_eq!(&inner[2 + 256..], b"m");
    }

    #[test]
    fn test_wrong_sender_key_is_signature_invalid() {
        for format in FORMATS {
            let env = protect(b"from alice", alice(), bob().public(), &opts(format)).unwrap();
            let result = unprotect(&env, bob(), carol().public(), format);
            assert!(matches!(result, Err(CryptoError::SignatureInvalid)), "format={format}");
        }
    }

    #[test]
    fn test_wrong_receiver_fails_before_verification() {
        let env = protect(b"for bob", alice(), bob().public(), &opts(WireFormat::Framed)).unwrap();
        let result = unprotect(&env, carol(), alice().public(), WireFormat::Framed);
        assert!(matches!(
            result,
            Err(CryptoError::UnwrapFailed | CryptoError::BadPadding)
        ));
    }

    #[test]
    fn test_tampered_envelope_rejected() {
        for format in FORMATS {
            let env = protect(b"do not touch", alice(), bob().public(), &opts(format)).unwrap();
            // last byte sits in the final ciphertext block
            for pos in [20, env.len() - 1] {
                let mut tampered = env.clone();
                tampered[pos] ^= 0x01;
                assert!(
                    unprotect(&tampered, bob(), alice().public(), format).is_err(),
                    "format={format} pos={pos}"
                );
            }
        }
    }

    #[test]
    fn test_signed_payload_layout() {
        let legacy = sign_only(b"abc", alice(), WireFormat::Legacy).unwrap();
        assert_eq!(legacy.len(), alice().size_in_bytes() + 3);
        assert!(legacy.ends_with(b"abc"));

        let framed = sign_only(b"abc", alice(), WireFormat::Framed).unwrap();
        assert_eq!(framed.len(), 2 + alice().size_in_bytes() + 3);
        assert_eq!(
            u16::from_be_bytes([framed[0], framed[1]]) as usize,
            alice().size_in_bytes()
        );
    }

    #[test]
    fn test_open_signed_strips_signature() {
        for format in FORMATS {
            let signed = sign_only(b"payload", alice(), format).unwrap();
            assert_eq!(open_signed(&signed, alice().public(), format).unwrap(), b"payload");
        }
    }

    #[test]
    fn test_open_signed_rejects_short_and_modified() {
        for format in FORMATS {
            assert!(matches!(
                open_signed(&[0u8; 10], alice().public(), format),
                Err(CryptoError::SignatureInvalid)
            ));

            let mut signed = sign_only(b"payload", alice(), format).unwrap();
            let last = signed.len() - 1;
            signed[last] ^= 0x20;
            assert!(matches!(
                open_signed(&signed, alice().public(), format),
                Err(CryptoError::SignatureInvalid)
            ));
        }
    }

    #[test]
    fn test_signature_does_not_depend_on_receiver() {
        // PKCS#1 v1.5 is deterministic, so the inner payload must be identical
        let to_bob = protect(b"same", alice(), bob().public(), &opts(WireFormat::Legacy)).unwrap();
        let to_carol =
            protect(b"same", alice(), carol().public(), &opts(WireFormat::Legacy)).unwrap();
        let inner_bob = envelope::unseal(&to_bob, bob(), WireFormat::Legacy).unwrap();
        let inner_carol = envelope::unseal(&to_carol, carol(), WireFormat::Legacy).unwrap();
        assert_eq!(inner_bob, inner_carol);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn roundtrip_arbitrary_payload(data in proptest::collection::vec(any::<u8>(), 0..2048), framed: bool) {
                let format = if framed { WireFormat::Framed } else { WireFormat::Legacy };
                let env = protect(&data, alice(), bob().public(), &opts(format)).unwrap();
                let out = unprotect(&env, bob(), alice().public(), format).unwrap();
                prop_assert_eq!(out, data);
            }

            #[test]
            fn flipped_ciphertext_bit_never_verifies(
                data in proptest::collection::vec(any::<u8>(), 1..256),
                offset in any::<proptest::sample::Index>(),
                bit in 0u8..8,
            ) {
                let format = WireFormat::Framed;
                let mut env = protect(&data, alice(), bob().public(), &opts(format)).unwrap();
                let start = crate::envelope::FRAME_HEADER_LEN + crate::IV_LEN + bob().size_in_bytes();
                let pos = start + offset.index(env.len() - start);
                env[pos] ^= 1 << bit;
                prop_assert!(unprotect(&env, bob(), alice().public(), format).is_err());
            }
        }
    }
}
