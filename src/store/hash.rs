//! Content hashes: the key every blob is stored under.

use sha1::{Digest, Sha1};

use crate::error::{Result, XzipError};

/// A 20-byte SHA-1 digest identifying a blob's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHash(pub [u8; 20]);

impl BlobHash {
    pub const LEN: usize = 20;

    /// Hash a complete byte slice
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self::from_hasher(hasher)
    }

    pub(crate) fn from_hasher(hasher: Sha1) -> Self {
        let mut digest = [0u8; Self::LEN];
        digest.copy_from_slice(&hasher.finalize());
        BlobHash(digest)
    }

    /// Return the hash as a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| XzipError::parse(format!("bad hash {}: {}", s, e)))?;
        let digest: [u8; Self::LEN] = bytes
            .try_into()
            .map_err(|_| XzipError::parse(format!("bad hash {}: wrong length", s)))?;
        Ok(BlobHash(digest))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for BlobHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
