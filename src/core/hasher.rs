//! BLAKE3 content hashing for nodes and manifests.
//!
//! Hashes are `"blake3:{hex}"`. JSON hashed here comes from structs and
//! `IndexMap`s only, so field and key order is fixed and the encoding is
//! canonical.

use serde::Serialize;

/// Hash a string.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash the compact JSON encoding of `value`.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut hasher = blake3::Hasher::new();
    serde_json::to_writer(&mut hasher, value)?;
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Combine labelled hashes into one, in the given order.
pub fn composite_hash(parts: &[(&str, &str)]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (label, hash) in parts {
        hasher.update(label.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}
