//! Commitment hook: a deterministic digest over a published consensus
//! price, computed before handing off to the publisher so that an
//! on-chain observer can later verify the price/timestamp pair without
//! trusting the publishing transport. Grounded in the teacher's use of
//! `sha2`/`hex` for content-addressed payloads (see the analytics and
//! RAG modules' digesting of cached blobs), generalized here into a
//! single-purpose price commitment.

use sha2::{Digest, Sha256};

/// Inputs committed to. `proof_digest` is optional: a caller without a
/// zero-knowledge proof attached simply omits it, and the commitment
/// degrades to a digest over price, timestamp and asset id alone.
#[derive(Debug, Clone)]
pub struct CommitmentInput<'a> {
    pub asset_id: &'a str,
    pub price: f64,
    pub timestamp: i64,
    pub proof_digest: Option<&'a str>,
}

/// Computes a hex-encoded SHA-256 digest over a fixed, delimited encoding
/// of the commitment input. The field order and delimiter are part of the
/// commitment's meaning: changing them changes every digest this function
/// has ever produced, so they are frozen here rather than left to a
/// derive-generated `Debug`/`Display` impl.
///
/// Open question resolved: the spec leaves proof-digest canonicalization
/// unspecified. This implementation folds the proof digest into the same
/// hash (rather than computing a separate commitment tree) when present,
/// and uses a literal `"none"` placeholder when absent, so the digest
/// shape never depends on whether a proof was attached.
pub fn commit(input: &CommitmentInput<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.asset_id.as_bytes());
    hasher.update(b"|");
    hasher.update(round_price_bits(input.price).to_be_bytes());
    hasher.update(b"|");
    hasher.update(input.timestamp.to_be_bytes());
    hasher.update(b"|");
    hasher.update(input.proof_digest.unwrap_or("none").as_bytes());
    hex::encode(hasher.finalize())
}

/// Prices are committed by their IEEE-754 bit pattern rather than a
/// decimal string, so the digest is stable regardless of how the caller
/// formats the float.
fn round_price_bits(price: f64) -> u64 {
    price.to_bits()
}
