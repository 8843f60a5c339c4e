//! Content addresses for naming provenance keys.
//!
//! Not a security boundary: the hash only has to be stable across machines and
//! unlikely to collide between two input paths of one artifact.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentAddress(String);

impl ContentAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept an already rendered address, e.g. a suffix read back from a
    /// manifest key.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn digest(s: &str) -> ContentAddress {
    ContentAddress(hex::encode(Sha256::digest(s.as_bytes())))
}
