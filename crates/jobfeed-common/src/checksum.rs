//! Content fingerprints for stored documents
//!
//! Sinks compare the fingerprint of an incoming field map with the stored one
//! to tell a real replacement from a re-delivery of identical content.

use crate::types::FieldMap;
use sha2::{Digest, Sha256};

/// SHA-256 over the field map in field order, hex encoded.
///
/// Every name and value is length-prefixed so that moving bytes between
/// adjacent fields always changes the digest.
pub fn fingerprint(fields: &FieldMap) -> String {
    let mut hasher = Sha256::new();

    for (name, value) in fields.iter() {
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }

    hex::encode(hasher.finalize())
}
