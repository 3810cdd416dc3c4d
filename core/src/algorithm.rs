//! Hash algorithm adapter: one opaque `hash(bytes) -> bytes` per active
//! coin, plus the big-endian target comparator every adapter shares.

use std::fmt;

use crate::crypto::double_sha256;
use crate::target::hash_meets_target;

/// A block-header hashing function, pluggable per coin. Every Bitcoin-family
/// coin the pool currently serves uses double-SHA256, but submissions are
/// always routed through this trait so a future coin with a different PoW
/// function only has to add a variant, not touch the share validator.
pub trait HashAlgorithm {
    /// Hash a fully assembled block header.
    fn hash_header(&self, header: &[u8]) -> [u8; 32];

    /// `hash(header) <= target`, big-endian unsigned compare.
    fn meets_target(&self, header: &[u8], target: &[u8; 32]) -> bool {
        hash_meets_target(&self.hash_header(header), target)
    }
}

/// The set of hash algorithms the pool knows how to validate shares for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// SHA-256 applied twice: Bitcoin and its direct forks.
    Sha256d,
}

impl Algorithm {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256d" | "sha256" | "bitcoin" => Some(Algorithm::Sha256d),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256d => "sha256d",
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Sha256d
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl HashAlgorithm for Algorithm {
    fn hash_header(&self, header: &[u8]) -> [u8; 32] {
        match self {
            Algorithm::Sha256d => double_sha256(header),
        }
    }
}
