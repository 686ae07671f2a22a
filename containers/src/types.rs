use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte hash identifying blocks, views, and committee snapshots.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// A hash with every byte set to `byte`. Handy for fixtures.
    pub fn repeat(byte: u8) -> Self {
        Hash32([byte; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash32(bytes)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}..", hex::encode(&self.0[..4]))
    }
}

/// Identifies one logical chain: the coordinating beacon chain or one of the
/// parallel shard chains.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ChainId {
    Beacon,
    Shard(u8),
}

impl ChainId {
    pub fn is_beacon(&self) -> bool {
        matches!(self, ChainId::Beacon)
    }

    pub fn shard(&self) -> Option<u8> {
        match self {
            ChainId::Beacon => None,
            ChainId::Shard(id) => Some(*id),
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainId::Beacon => write!(f, "beacon"),
            ChainId::Shard(id) => write!(f, "shard-{id}"),
        }
    }
}
