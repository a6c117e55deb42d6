//! secp256k1 point validation and message digesting.
//!
//! The core never computes an ECDSA signature itself (that's the Backing
//! Vault's job), but it does validate the compressed public key bytes the
//! vault hands back (invariant I3) and hash the caller's message before
//! handing the digest to the vault for prehashed signing.

use k256::elliptic_curve::sec1::FromEncodedPoint;
use k256::{EncodedPoint, PublicKey};
use sha2::{Digest, Sha256};

use crate::error::{Error, ErrorKind};

/// Number of bytes in a compressed secp256k1 public key.
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

/// SHA-256 digests `msg`, returning the 32-byte result the vault's
/// `prehashed=true` signing mode expects.
pub fn sha256(msg: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(msg);
    hasher.finalize().into()
}

/// Validates that `bytes` is a 33-byte compressed secp256k1 point with a
/// valid lead byte (`0x02`/`0x03`) that actually decodes onto the curve
/// (invariant I3). Returns the bytes unchanged on success.
pub fn validate_compressed_pubkey(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    if bytes.len() != COMPRESSED_PUBKEY_LEN {
        return Err(Error::new(
            ErrorKind::InvalidSignature,
            format!(
                "public key must be {COMPRESSED_PUBKEY_LEN} compressed bytes, got {}",
                bytes.len()
            ),
        ));
    }
    match bytes[0] {
        0x02 | 0x03 => {}
        other => {
            return Err(Error::new(
                ErrorKind::InvalidSignature,
                format!("public key lead byte must be 0x02 or 0x03, got {other:#04x}"),
            ))
        }
    }

    let point = EncodedPoint::from_bytes(bytes).map_err(|e| {
        Error::new(
            ErrorKind::InvalidSignature,
            format!("public key is not a valid SEC1 encoded point: {e}"),
        )
    })?;
    let maybe_key = PublicKey::from_encoded_point(&point);
    if bool::from(maybe_key.is_none()) {
        return Err(Error::new(
            ErrorKind::InvalidSignature,
            "public key bytes do not decode to a point on the secp256k1 curve",
        ));
    }

    Ok(bytes.to_vec())
}

/// Decodes a lowercase-hex compressed public key as returned by the vault
/// and validates it (invariant I3).
pub fn decode_hex_pubkey(hex_str: &str) -> Result<Vec<u8>, Error> {
    let bytes = hex::decode(hex_str).map_err(|e| {
        Error::new(
            ErrorKind::InvalidSignature,
            format!("public key \"{hex_str}\" is not valid hex: {e}"),
        )
    })?;
    validate_compressed_pubkey(&bytes)
}
