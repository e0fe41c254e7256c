//! Collection manifests.
//!
//! The manifest is the single source of truth for a collection: a store
//! whose manifest is missing, unparsable, or whose checksum does not match
//! the matrix bytes is treated as unreadable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Schema version stamped into every manifest this build writes.
pub const SCHEMA_VERSION: u32 = 1;

/// Algorithm identifier for cosine-over-normalized-rows artifacts.
pub const ALGORITHM: &str = "cosine-flat-v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub dim: usize,
    pub rows: usize,
    pub algorithm: String,
    pub sha256_hex: String,
    pub schema_version: u32,
}

impl Manifest {
    pub fn new(name: &str, dim: usize, rows: usize, matrix_bytes: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            dim,
            rows,
            algorithm: ALGORITHM.to_string(),
            sha256_hex: sha256_hex(matrix_bytes),
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Hex-encoded sha256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
