//! Canonical hashing helpers for the change fingerprint.
//!
//! Every field is framed so that distinct sequences of values can never
//! serialize to the same byte stream before hashing.

use sha2::{Digest, Sha256};

/// Hashes a byte field with an explicit length prefix.
pub(crate) fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    hasher.update(len.to_be_bytes());
    hasher.update(bytes);
}

/// Hashes an optional string field.
///
/// A presence byte precedes the value so that an absent field and an empty
/// field hash differently.
pub(crate) fn hash_optional_field(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            hash_field(hasher, v.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}
