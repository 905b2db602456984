//! Content hashing for change detection and idempotency
//!
//! Both the sync engine (skip unchanged external records) and the outbox
//! (deduplicate identical submissions) key on the same digest, so the
//! canonical form lives here.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Result;

/// SHA-256 hex digest of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash a serializable value through its canonical JSON form
///
/// `serde_json::Value` objects are key-sorted maps, so two payloads that
/// differ only in key order produce the same digest.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(sha256_hex(&bytes))
}
