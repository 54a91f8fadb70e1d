//! Content identifier helpers.
//! A CID (v0 or v1) is normalized to its v1 byte form and treated as a
//! big-endian non-negative integer for deterministic shard placement.

use cid::Cid;
use thiserror::Error;

/// Error returned when a candidate string is not a well-formed CID.
#[derive(Debug, Error)]
pub enum CidError {
    #[error("invalid cid: {0}")]
    Parse(#[from] cid::Error),
}

/// Parse a CID string (v0 base58 or v1 multibase) and return its
/// canonical v1 byte representation. A v0 CID keeps its codec and
/// multihash, so both forms of the same content yield identical bytes.
pub fn canonical_bytes(s: &str) -> Result<Vec<u8>, CidError> {
    let c = Cid::try_from(s)?;
    let v1 = Cid::new_v1(c.codec(), *c.hash());
    Ok(v1.to_bytes())
}

/// Remainder of the big-endian integer formed by `bytes` modulo `modulus`.
///
/// Streaming byte-wise reduction; the accumulator stays below `modulus`
/// so the shifted intermediate always fits in a u128.
pub fn mod_big_endian(bytes: &[u8], modulus: u64) -> u64 {
    debug_assert!(modulus > 0, "modulus must be positive");
    let m = u128::from(modulus);
    let rem = bytes
        .iter()
        .fold(0u128, |acc, &b| ((acc << 8) | u128::from(b)) % m);
    rem as u64
}

/// `cid as big integer` modulo `modulus`.
pub fn cid_mod(s: &str, modulus: u64) -> Result<u64, CidError> {
    let bytes = canonical_bytes(s)?;
    Ok(mod_big_endian(&bytes, modulus))
}
