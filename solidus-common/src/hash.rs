use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_512};
use std::fmt;

/// A 64-byte consensus digest.
///
/// `Hash::init()` (all zero bytes) is the sentinel the spec uses to denote
/// absence — an un-revealed pre-image, a genesis block's missing parent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(#[serde(with = "hash_bytes")] [u8; 64]);

mod hash_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        bytes.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let bytes: Vec<u8> = Vec::deserialize(d)?;
        <[u8; 64]>::try_from(bytes.as_slice())
            .map_err(|_| D::Error::custom("expected 64 bytes"))
    }
}

impl Hash {
    /// The sentinel value denoting absence or a slashed pre-image slot.
    #[must_use]
    pub const fn init() -> Self {
        Self([0u8; 64])
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    #[must_use]
    pub fn is_init(&self) -> bool {
        self.0 == [0u8; 64]
    }

    /// Hashes arbitrary bytes with SHA3-512.
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha3_512::new();
        hasher.update(data);
        let out = hasher.finalize();
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&out);
        Self(bytes)
    }

    /// Hashes the concatenation of several byte slices without an
    /// intermediate allocation, the way a header hash binds several fields.
    #[must_use]
    pub fn digest_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha3_512::new();
        for part in parts {
            hasher.update(part);
        }
        let out = hasher.finalize();
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&out);
        Self(bytes)
    }

    /// One link of a pre-image hash chain: `digest(self)`.
    #[must_use]
    pub fn chain_step(&self) -> Self {
        Self::digest(&self.0)
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::init()
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = crate::error::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 64 {
            return Err(crate::error::Error::InvalidHashLength(value.len()));
        }
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(value);
        Ok(Self(bytes))
    }
}
