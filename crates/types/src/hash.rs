//! Tagged digests and the imprint wire encoding.
//!
//! Every digest that crosses a process boundary is carried as a `DataHash`:
//! an algorithm tag plus the raw digest bytes. The *imprint* is the
//! canonical byte encoding (2-byte big-endian tag followed by the digest)
//! and the wire form is the lowercase hex of the imprint. Equality is
//! tag-and-bytes.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Identifies the hash function a digest was produced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256, tag `0x0000`.
    Sha256,
}

impl HashAlgorithm {
    /// The 2-byte big-endian tag written in front of the digest.
    pub fn tag(self) -> u16 {
        match self {
            HashAlgorithm::Sha256 => 0x0000,
        }
    }

    /// Resolves a tag back to an algorithm.
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            0x0000 => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
        }
    }
}

/// Errors produced while decoding an imprint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashDecodeError {
    /// The input was not valid lowercase hex.
    #[error("imprint is not valid hex: {0}")]
    Hex(String),
    /// The imprint was shorter than the 2-byte algorithm tag.
    #[error("imprint is truncated")]
    Truncated,
    /// The algorithm tag is not one we know.
    #[error("unknown hash algorithm tag {0:#06x}")]
    UnknownAlgorithm(u16),
    /// The digest length does not match the tagged algorithm.
    #[error("digest length {got} does not match algorithm (expected {expected})")]
    BadLength { got: usize, expected: usize },
}

/// An algorithm-tagged digest.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DataHash {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl DataHash {
    /// Wraps an already-computed digest. The digest length must match the
    /// algorithm.
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> Result<Self, HashDecodeError> {
        if digest.len() != algorithm.digest_len() {
            return Err(HashDecodeError::BadLength {
                got: digest.len(),
                expected: algorithm.digest_len(),
            });
        }
        Ok(Self { algorithm, digest })
    }

    /// SHA-256 of `data`, tagged.
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            digest: Sha256::digest(data).to_vec(),
        }
    }

    /// SHA-256 over a sequence of byte chunks, tagged.
    pub fn sha256_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = Sha256::new();
        for chunk in chunks {
            hasher.update(chunk);
        }
        Self {
            algorithm: HashAlgorithm::Sha256,
            digest: hasher.finalize().to_vec(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The raw digest, without the algorithm tag.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Canonical encoding: 2-byte big-endian tag followed by the digest.
    pub fn imprint(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.digest.len());
        out.extend_from_slice(&self.algorithm.tag().to_be_bytes());
        out.extend_from_slice(&self.digest);
        out
    }

    /// Decodes an imprint produced by [`DataHash::imprint`].
    pub fn from_imprint(bytes: &[u8]) -> Result<Self, HashDecodeError> {
        let (tag, digest) = match bytes {
            [hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]), rest),
            _ => return Err(HashDecodeError::Truncated),
        };
        let algorithm =
            HashAlgorithm::from_tag(tag).ok_or(HashDecodeError::UnknownAlgorithm(tag))?;
        Self::new(algorithm, digest.to_vec())
    }

    /// Decodes the lowercase-hex wire form of an imprint.
    pub fn from_hex_imprint(s: &str) -> Result<Self, HashDecodeError> {
        let bytes = hex::decode(s).map_err(|e| HashDecodeError::Hex(e.to_string()))?;
        Self::from_imprint(&bytes)
    }

    /// The lowercase-hex wire form of the imprint.
    pub fn to_hex_imprint(&self) -> String {
        hex::encode(self.imprint())
    }
}

impl std::fmt::Debug for DataHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataHash({})", self.to_hex_imprint())
    }
}

impl std::fmt::Display for DataHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex_imprint())
    }
}

impl Serialize for DataHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_imprint())
    }
}

impl<'de> Deserialize<'de> for DataHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DataHash::from_hex_imprint(&s).map_err(de::Error::custom)
    }
}
