use crate::Hash32;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compressed validator public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorKey(pub [u8; 32]);

impl ValidatorKey {
    pub fn repeat(byte: u8) -> Self {
        ValidatorKey([byte; 32])
    }
}

impl fmt::Debug for ValidatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vk:{}..", hex::encode(&self.0[..4]))
    }
}

/// A validator committee snapshot. Block signatures are validated against the
/// committee identified by the block's committee root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committee {
    /// Root identifying this snapshot; matches `BlockHeader::committee_root`
    /// on every block the committee signed.
    pub root: Hash32,
    pub epoch: u64,
    pub members: Vec<ValidatorKey>,
}

impl Committee {
    pub fn new(root: Hash32, epoch: u64, members: Vec<ValidatorKey>) -> Self {
        Self {
            root,
            epoch,
            members,
        }
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }
}
