use crate::{ChainId, Hash32, Instruction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Header fields shared by every block kind.
///
/// The hash is sealed over the remaining fields at construction time, so a
/// header built through [`BlockHeader::new`] is internally consistent by
/// construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain: ChainId,
    pub height: u64,
    pub hash: Hash32,
    pub prev_hash: Hash32,
    /// Proposal time in unix milliseconds. Fork choice breaks height ties
    /// toward the earlier time.
    pub proposed_at_ms: u64,
    /// Root of the committee snapshot whose signatures commit this block.
    pub committee_root: Hash32,
    pub body_root: Hash32,
}

impl BlockHeader {
    pub fn new(
        chain: ChainId,
        height: u64,
        prev_hash: Hash32,
        proposed_at_ms: u64,
        committee_root: Hash32,
        body_root: Hash32,
    ) -> Self {
        let hash = Self::seal(chain, height, prev_hash, proposed_at_ms, committee_root, body_root);
        Self {
            chain,
            height,
            hash,
            prev_hash,
            proposed_at_ms,
            committee_root,
            body_root,
        }
    }

    fn seal(
        chain: ChainId,
        height: u64,
        prev_hash: Hash32,
        proposed_at_ms: u64,
        committee_root: Hash32,
        body_root: Hash32,
    ) -> Hash32 {
        let mut hasher = Sha256::new();
        match chain {
            ChainId::Beacon => hasher.update([0xff, 0x00]),
            ChainId::Shard(id) => hasher.update([0x00, id]),
        }
        hasher.update(height.to_be_bytes());
        hasher.update(prev_hash.0);
        hasher.update(proposed_at_ms.to_be_bytes());
        hasher.update(committee_root.0);
        hasher.update(body_root.0);
        Hash32(hasher.finalize().into())
    }
}

/// Digest of one shard block as recorded on the beacon chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStateDigest {
    pub shard: u8,
    pub height: u64,
    pub hash: Hash32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlock {
    pub header: BlockHeader,
    pub shard_states: Vec<ShardStateDigest>,
    pub instructions: Vec<Instruction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardBlock {
    pub header: BlockHeader,
    /// Beacon height this block builds against. The block may not be
    /// consumed before that beacon height is locally final.
    pub beacon_height: u64,
    pub tx_root: Hash32,
    pub instructions: Vec<Instruction>,
}

/// Value transferred from one shard block to another shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossOutput {
    pub recipient: Hash32,
    pub amount: u64,
}

/// Derived block carrying only the outputs of one shard block destined for
/// another shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossShardBlock {
    pub header: BlockHeader,
    pub source_shard: u8,
    pub target_shard: u8,
    pub outputs: Vec<CrossOutput>,
}

/// Condensed shard block view sent to beacon-chain producers and validators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardToBeaconBlock {
    pub header: BlockHeader,
    pub shard: u8,
    pub instructions: Vec<Instruction>,
}

/// All block kinds the synchronization layer moves around.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Beacon(BeaconBlock),
    Shard(ShardBlock),
    CrossShard(CrossShardBlock),
    ShardToBeacon(ShardToBeaconBlock),
}

impl Block {
    pub fn header(&self) -> &BlockHeader {
        match self {
            Block::Beacon(block) => &block.header,
            Block::Shard(block) => &block.header,
            Block::CrossShard(block) => &block.header,
            Block::ShardToBeacon(block) => &block.header,
        }
    }

    pub fn hash(&self) -> Hash32 {
        self.header().hash
    }

    pub fn prev_hash(&self) -> Hash32 {
        self.header().prev_hash
    }

    pub fn height(&self) -> u64 {
        self.header().height
    }

    pub fn proposed_at_ms(&self) -> u64 {
        self.header().proposed_at_ms
    }

    pub fn chain(&self) -> ChainId {
        self.header().chain
    }

    /// The committee-defining reference: which snapshot governs this block's
    /// signature validation.
    pub fn committee_root(&self) -> Hash32 {
        self.header().committee_root
    }

    /// Beacon height this block's validity depends on, for the kinds that
    /// carry such a reference.
    pub fn beacon_reference(&self) -> Option<u64> {
        match self {
            Block::Shard(block) => Some(block.beacon_height),
            Block::Beacon(_) | Block::CrossShard(_) | Block::ShardToBeacon(_) => None,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        match self {
            Block::Beacon(block) => &block.instructions,
            Block::Shard(block) => &block.instructions,
            Block::CrossShard(_) => &[],
            Block::ShardToBeacon(block) => &block.instructions,
        }
    }

    /// Whether this block carries an instruction that rotates the signing
    /// committee, ending the committee epoch after it.
    pub fn changes_committee(&self) -> bool {
        self.instructions()
            .iter()
            .any(Instruction::changes_committee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(chain: ChainId, height: u64, prev: Hash32) -> BlockHeader {
        BlockHeader::new(chain, height, prev, height * 1_000, Hash32::repeat(9), Hash32::ZERO)
    }

    #[test]
    fn test_seal_is_deterministic() {
        let a = header(ChainId::Beacon, 5, Hash32::repeat(1));
        let b = header(ChainId::Beacon, 5, Hash32::repeat(1));
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_seal_distinguishes_fields() {
        let base = header(ChainId::Beacon, 5, Hash32::repeat(1));
        assert_ne!(base.hash, header(ChainId::Beacon, 6, Hash32::repeat(1)).hash);
        assert_ne!(base.hash, header(ChainId::Beacon, 5, Hash32::repeat(2)).hash);
        assert_ne!(base.hash, header(ChainId::Shard(0), 5, Hash32::repeat(1)).hash);
    }

    #[test]
    fn test_committee_change_detection() {
        let block = Block::Shard(ShardBlock {
            header: header(ChainId::Shard(1), 10, Hash32::repeat(3)),
            beacon_height: 8,
            tx_root: Hash32::ZERO,
            instructions: vec![Instruction::Swap {
                in_keys: vec![],
                out_keys: vec![],
            }],
        });
        assert!(block.changes_committee());

        let quiet = Block::Shard(ShardBlock {
            header: header(ChainId::Shard(1), 11, block.hash()),
            beacon_height: 8,
            tx_root: Hash32::ZERO,
            instructions: vec![],
        });
        assert!(!quiet.changes_committee());
        assert_eq!(quiet.prev_hash(), block.hash());
        assert_eq!(quiet.beacon_reference(), Some(8));
    }
}
