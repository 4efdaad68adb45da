//! Hashing utilities for content-addressed directory names.
//!
//! Buildpack directories and supply cache directories are named after the
//! SHA-256 of the buildpack name, which keeps arbitrary names (URLs, names
//! with slashes) filesystem-safe and lets independent processes agree on the
//! location without any shared state.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 of a name and return it as lowercase hex.
pub fn hash_name(name: &str) -> String {
  hash_bytes(name.as_bytes())
}

/// Compute the SHA-256 of arbitrary bytes and return it as lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}
