use crate::{Chain, ChainError};
use containers::{Block, ChainId, Committee, Hash32};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory chain used by tests and local tooling.
///
/// Committees, signature verdicts, and insertion failures are scriptable so
/// callers can exercise the batched-insertion and synchronization paths
/// without a real ledger behind them.
pub struct MemChain {
    id: ChainId,
    inner: Mutex<Inner>,
    ready: AtomicBool,
}

#[derive(Default)]
struct Inner {
    blocks_by_height: BTreeMap<u64, Block>,
    heights_by_hash: HashMap<Hash32, u64>,
    /// Committee active from the keyed height onward.
    committees: BTreeMap<u64, Committee>,
    invalid_signatures: HashSet<Hash32>,
    failing_inserts: HashSet<Hash32>,
    validations: u64,
}

impl MemChain {
    pub fn new(id: ChainId) -> Self {
        Self {
            id,
            inner: Mutex::new(Inner::default()),
            ready: AtomicBool::new(true),
        }
    }

    /// Install the committee governing blocks from `from_height` onward.
    pub fn set_committee(&self, from_height: u64, committee: Committee) {
        self.inner.lock().committees.insert(from_height, committee);
    }

    pub fn with_committee(self, from_height: u64, committee: Committee) -> Self {
        self.set_committee(from_height, committee);
        self
    }

    /// Make signature validation fail for the given block hash.
    pub fn script_invalid_signature(&self, hash: Hash32) {
        self.inner.lock().invalid_signatures.insert(hash);
    }

    /// Make insertion fail for the given block hash.
    pub fn script_insert_failure(&self, hash: Hash32) {
        self.inner.lock().failing_inserts.insert(hash);
    }

    /// How many signature validations have been performed.
    pub fn validation_count(&self) -> u64 {
        self.inner.lock().validations
    }

    pub fn heights(&self) -> Vec<u64> {
        self.inner.lock().blocks_by_height.keys().copied().collect()
    }
}

impl Chain for MemChain {
    fn id(&self) -> ChainId {
        self.id
    }

    fn best_height(&self) -> u64 {
        self.inner
            .lock()
            .blocks_by_height
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
    }

    fn best_hash(&self) -> Hash32 {
        let inner = self.inner.lock();
        inner
            .blocks_by_height
            .values()
            .next_back()
            .map(|block| block.hash())
            .unwrap_or(Hash32::ZERO)
    }

    fn final_height(&self) -> u64 {
        self.best_height().saturating_sub(1)
    }

    fn final_hash(&self) -> Hash32 {
        let final_height = self.final_height();
        self.inner
            .lock()
            .blocks_by_height
            .get(&final_height)
            .map(|block| block.hash())
            .unwrap_or(Hash32::ZERO)
    }

    fn all_view_hashes(&self) -> Vec<Hash32> {
        let inner = self.inner.lock();
        inner
            .blocks_by_height
            .values()
            .rev()
            .take(2)
            .map(|block| block.hash())
            .collect()
    }

    fn current_height(&self) -> u64 {
        self.best_height()
    }

    fn insert_block(&self, block: &Block, full_validation: bool) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        let hash = block.hash();
        let height = block.height();

        if inner.heights_by_hash.contains_key(&hash) {
            return Ok(());
        }
        if inner.failing_inserts.contains(&hash) {
            return Err(ChainError::Insert {
                hash,
                height,
                reason: "scripted failure".into(),
            });
        }
        if full_validation && inner.invalid_signatures.contains(&hash) {
            return Err(ChainError::InvalidSignature { hash, height });
        }
        if let Some(best) = inner.blocks_by_height.keys().next_back().copied() {
            if height != best + 1 {
                return Err(ChainError::Insert {
                    hash,
                    height,
                    reason: format!("non-contiguous insert over best height {best}"),
                });
            }
        }

        inner.blocks_by_height.insert(height, block.clone());
        inner.heights_by_hash.insert(hash, height);
        Ok(())
    }

    fn has_block(&self, block: &Block) -> bool {
        self.inner.lock().heights_by_hash.contains_key(&block.hash())
    }

    fn validate_block_signatures(
        &self,
        block: &Block,
        committee: &Committee,
    ) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        inner.validations += 1;
        let hash = block.hash();
        if inner.invalid_signatures.contains(&hash) || committee.root != block.committee_root() {
            return Err(ChainError::InvalidSignature {
                hash,
                height: block.height(),
            });
        }
        Ok(())
    }

    fn committee_at(&self, height: u64) -> Result<Committee, ChainError> {
        self.inner
            .lock()
            .committees
            .range(..=height)
            .next_back()
            .map(|(_, committee)| committee.clone())
            .ok_or(ChainError::CommitteeUnavailable { height })
    }

    fn block_by_height(&self, height: u64) -> Option<Block> {
        self.inner.lock().blocks_by_height.get(&height).cloned()
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use containers::{BlockHeader, ShardBlock};

    fn block(height: u64, prev: Hash32) -> Block {
        Block::Shard(ShardBlock {
            header: BlockHeader::new(
                ChainId::Shard(0),
                height,
                prev,
                height * 1_000,
                Hash32::repeat(0xcc),
                Hash32::ZERO,
            ),
            beacon_height: height,
            tx_root: Hash32::ZERO,
            instructions: vec![],
        })
    }

    #[test]
    fn test_contiguous_inserts_advance_heights() {
        let chain = MemChain::new(ChainId::Shard(0));
        let genesis = block(1, Hash32::ZERO);
        chain.insert_block(&genesis, true).unwrap();
        let second = block(2, genesis.hash());
        chain.insert_block(&second, false).unwrap();

        assert_eq!(chain.best_height(), 2);
        assert_eq!(chain.final_height(), 1);
        assert_eq!(chain.best_hash(), second.hash());
        assert!(chain.has_block(&genesis));
    }

    #[test]
    fn test_gap_insert_is_refused() {
        let chain = MemChain::new(ChainId::Shard(0));
        let genesis = block(1, Hash32::ZERO);
        chain.insert_block(&genesis, true).unwrap();

        let err = chain.insert_block(&block(5, genesis.hash()), false).unwrap_err();
        assert!(matches!(err, ChainError::Insert { height: 5, .. }));
    }

    #[test]
    fn test_committee_lookup_uses_latest_epoch() {
        let chain = MemChain::new(ChainId::Beacon)
            .with_committee(1, Committee::new(Hash32::repeat(1), 0, vec![]))
            .with_committee(100, Committee::new(Hash32::repeat(2), 1, vec![]));

        assert_eq!(chain.committee_at(50).unwrap().root, Hash32::repeat(1));
        assert_eq!(chain.committee_at(100).unwrap().root, Hash32::repeat(2));
        assert!(chain.committee_at(0).is_err());
    }
}
