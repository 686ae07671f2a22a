use containers::{Block, ChainId, Hash32};

/// One candidate block at a given height within one chain, as tracked by the
/// fork-choice structure. Carries only the header metadata fork choice needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
    pub hash: Hash32,
    pub prev_hash: Hash32,
    pub height: u64,
    /// Proposal time in unix milliseconds; height ties break toward the
    /// earlier time.
    pub block_time_ms: u64,
    pub committee_root: Hash32,
    pub chain: ChainId,
}

impl From<&Block> for View {
    fn from(block: &Block) -> Self {
        let header = block.header();
        Self {
            hash: header.hash,
            prev_hash: header.prev_hash,
            height: header.height,
            block_time_ms: header.proposed_at_ms,
            committee_root: header.committee_root,
            chain: header.chain,
        }
    }
}
