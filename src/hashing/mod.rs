//! Hex-digest hashing for cache keys, file names, and request signatures.

use std::fmt;

use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced while selecting a hashing algorithm.
#[derive(Debug, Error)]
pub enum HasherError {
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// A hashing algorithm producing a lowercase hexadecimal digest.
///
/// # Examples
///
/// ```
/// use hitgate::hashing::Hasher;
///
/// let digest = Hasher::Sha1.hash("abc");
/// assert_eq!(digest, "a9993e364706816aba3e25717850c26c9cd0d89d");
///
/// let hasher: Hasher = "sha256".parse().unwrap();
/// assert_eq!(hasher.hash("abc").len(), 64);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Hasher {
    /// SHA-1, used for cache file names and request signatures.
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
}

impl Hasher {
    /// Hashes `value` and returns the hex digest.
    pub fn hash(self, value: &str) -> String {
        match self {
            Self::Sha1 => hex::encode(Sha1::digest(value.as_bytes())),
            Self::Sha256 => hex::encode(Sha256::digest(value.as_bytes())),
        }
    }

    /// Returns the algorithm name accepted by [`FromStr`](std::str::FromStr).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Hasher {
    type Err = HasherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            _ => Err(HasherError::UnsupportedAlgorithm(s.to_owned())),
        }
    }
}
