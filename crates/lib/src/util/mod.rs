//! Shared utilities.
//!
//! Hashing for content-addressed paths, streaming checksum verification and
//! test helpers.

pub mod checksum;
pub mod hash;
