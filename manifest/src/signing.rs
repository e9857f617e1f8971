//! Canonical permissions payload and Ed25519 signature verification.
//!
//! The permissions mapping is the security boundary (see §4.1 rationale):
//! it is the only part of a manifest that is ever required to be signed.
//! The canonical payload must be byte-identical for any two permissions
//! maps that are equal as sets, independent of insertion order or JSON
//! whitespace.

use std::collections::BTreeMap;

use ed25519_dalek::Signature;
use ed25519_dalek::Verifier;
use ed25519_dalek::VerifyingKey;

/// `BTreeMap` orders keys lexicographically and `serde_json::to_vec` walks
/// that order deterministically, so this is the whole of the "canonical
/// serialization" requirement: sort by key, fix the value encoding to the
/// plain mode string, and skip whitespace entirely (compact output).
pub fn canonical_payload(permissions: &BTreeMap<String, String>) -> Vec<u8> {
    // `to_vec` on a `BTreeMap` is already compact and key-ordered; `unwrap`
    // is safe because the map's keys/values are plain `String`s, which can
    // never fail to serialize.
    serde_json::to_vec(permissions).expect("string map serialization cannot fail")
}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is not valid base64")]
    InvalidBase64,
    #[error("signature has wrong length: expected 64 bytes, got {0}")]
    WrongLength(usize),
    #[error("signature did not verify against any trusted key")]
    NotTrusted,
}

pub fn decode_signature(base64_sig: &str) -> Result<Signature, SignatureError> {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_sig)
        .map_err(|_| SignatureError::InvalidBase64)?;
    let array: [u8; 64] = bytes
        .clone()
        .try_into()
        .map_err(|_| SignatureError::WrongLength(bytes.len()))?;
    Ok(Signature::from_bytes(&array))
}

/// Verify `signature` over `payload` against at least one of `trusted_keys`.
pub fn verify_against_any(
    payload: &[u8],
    signature: &Signature,
    trusted_keys: &[VerifyingKey],
) -> Result<(), SignatureError> {
    for key in trusted_keys {
        if key.verify(payload, signature).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::NotTrusted)
}
