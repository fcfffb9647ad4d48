// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lookup-key hashing.

use serde_json::Value;

/// String key under which index rows are stored and queried.
pub type IndexHash = String;

/// Domain-separation prefix for tuple digests. Bump the version when the
/// encoding changes.
const TUPLE_DOMAIN: &[u8] = b"atlas:index-tuple:v1";

/// Computes the lookup hash for an ordered tuple of values.
///
/// A tuple of exactly one string passes through unchanged, so callers that
/// already hold a key (or index on a single string field) keep readable
/// hashes and pay nothing. Every other tuple is digested: the values are
/// encoded as a canonical CBOR array, domain-separated with a versioned
/// prefix, and hashed with BLAKE3. Equal tuples always digest equally.
/// Unrelated tuples may collide; the forward map tolerates that by keying
/// each hash bucket by node id, so one node's row is never evicted by
/// another landing in the same bucket.
#[must_use]
pub fn index_hash(values: &[Value]) -> IndexHash {
    if let [Value::String(single)] = values {
        return single.clone();
    }
    let mut encoded = Vec::new();
    if ciborium::ser::into_writer(&values, &mut encoded).is_err() {
        debug_assert!(false, "CBOR encoding of JSON value tuples cannot fail");
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(TUPLE_DOMAIN);
    hasher.update(&encoded);
    hex::encode(hasher.finalize().as_bytes())
}
