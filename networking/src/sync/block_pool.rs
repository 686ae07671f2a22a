use anyhow::{anyhow, Result};
use containers::{Block, Hash32};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Staging area for blocks that are not yet committed.
///
/// Blocks are indexed by hash and by parent hash, so the insertion driver
/// can walk forward from the chain's current views and reconstruct
/// contiguous runs out of whatever order the network delivered.
#[derive(Debug, Default, Clone)]
pub struct BlockPool {
    blocks: HashMap<Hash32, Block>,
    /// parent hash -> hashes of pooled children.
    children: HashMap<Hash32, Vec<Hash32>>,
}

impl BlockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent on hash. Returns whether the block was newly added.
    pub fn add_block(&mut self, block: Block) -> bool {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return false;
        }
        self.children.entry(block.prev_hash()).or_default().push(hash);
        self.blocks.insert(hash, block);
        true
    }

    pub fn has_hash(&self, hash: &Hash32) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn get_block(&self, hash: &Hash32) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn remove_block(&mut self, hash: &Hash32) -> Option<Block> {
        let block = self.blocks.remove(hash)?;
        if let Some(siblings) = self.children.get_mut(&block.prev_hash()) {
            siblings.retain(|sibling| sibling != hash);
            if siblings.is_empty() {
                self.children.remove(&block.prev_hash());
            }
        }
        Some(block)
    }

    /// Pooled blocks whose parent is `prev`.
    pub fn get_blocks_by_prev_hash(&self, prev: &Hash32) -> Vec<&Block> {
        self.children
            .get(prev)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|hash| self.blocks.get(hash))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The deepest descendant path below `from`, excluding `from` itself.
    /// Used when choosing which fork to pull next. Depth ties resolve
    /// toward the smaller child hash so the answer is stable.
    pub fn get_longest_chain(&self, from: &Hash32) -> Vec<Block> {
        self.longest_path(from)
            .into_iter()
            .filter_map(|hash| self.blocks.get(&hash).cloned())
            .collect()
    }

    fn longest_path(&self, from: &Hash32) -> Vec<Hash32> {
        let mut best: Vec<Hash32> = Vec::new();
        if let Some(children) = self.children.get(from) {
            let mut ordered = children.clone();
            ordered.sort();
            for child in ordered {
                let mut path = vec![child];
                path.extend(self.longest_path(&child));
                if path.len() > best.len() {
                    best = path;
                }
            }
        }
        best
    }

    /// Forward walk from `from` while exactly one pooled child exists: the
    /// longest prefix that can be extended without committing to a fork.
    pub fn get_final_chain(&self, from: &Hash32) -> Vec<Block> {
        let mut chain = Vec::new();
        let mut cursor = *from;
        loop {
            match self.children.get(&cursor) {
                Some(children) if children.len() == 1 => {
                    cursor = children[0];
                    match self.blocks.get(&cursor) {
                        Some(block) => chain.push(block.clone()),
                        None => break,
                    }
                }
                _ => break,
            }
        }
        chain
    }

    /// Parents referenced by pooled blocks but absent from the pool,
    /// deduplicated. These are the hashes to backfill.
    pub fn missing_parents(&self) -> Vec<Hash32> {
        self.blocks
            .values()
            .map(|block| block.prev_hash())
            .filter(|parent| !parent.is_zero() && !self.blocks.contains_key(parent))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect()
    }

    /// Drop entries at or below `final_height` once the pool exceeds
    /// `threshold`; they can never be committed anymore. Returns how many
    /// were evicted.
    pub fn evict_outdated(&mut self, final_height: u64, threshold: usize) -> usize {
        if self.blocks.len() <= threshold {
            return 0;
        }
        let stale: Vec<Hash32> = self
            .blocks
            .values()
            .filter(|block| block.height() <= final_height)
            .map(|block| block.hash())
            .collect();
        for hash in &stale {
            self.remove_block(hash);
        }
        if !stale.is_empty() {
            debug!(evicted = stale.len(), final_height, "Evicted outdated pool entries");
        }
        stale.len()
    }

    /// Every pooled block, ascending by height. Diagnostics surface.
    pub fn block_list(&self) -> Vec<Block> {
        let mut blocks: Vec<Block> = self.blocks.values().cloned().collect();
        blocks.sort_by_key(|block| (block.height(), block.hash()));
        blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

enum Command {
    Add {
        block: Box<Block>,
        reply: oneshot::Sender<bool>,
    },
    Contains {
        hash: Hash32,
        reply: oneshot::Sender<bool>,
    },
    Get {
        hash: Hash32,
        reply: oneshot::Sender<Option<Block>>,
    },
    Remove {
        hash: Hash32,
        reply: oneshot::Sender<Option<Block>>,
    },
    RemoveMany {
        hashes: Vec<Hash32>,
        reply: oneshot::Sender<()>,
    },
    ChildrenOf {
        prev: Hash32,
        reply: oneshot::Sender<Vec<Block>>,
    },
    LongestChainFrom {
        from: Hash32,
        reply: oneshot::Sender<Vec<Block>>,
    },
    FinalChainFrom {
        from: Hash32,
        reply: oneshot::Sender<Vec<Block>>,
    },
    MissingParents {
        reply: oneshot::Sender<Vec<Hash32>>,
    },
    Sweep {
        final_height: u64,
        reply: oneshot::Sender<usize>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
    BlockList {
        reply: oneshot::Sender<Vec<Block>>,
    },
}

/// Mailbox front-end for a [`BlockPool`] running on its own task; commands
/// execute strictly in arrival order.
#[derive(Clone)]
pub struct BlockPoolHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl BlockPoolHandle {
    pub fn spawn(mut pool: BlockPool, eviction_threshold: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Add { block, reply } => {
                        let _ = reply.send(pool.add_block(*block));
                    }
                    Command::Contains { hash, reply } => {
                        let _ = reply.send(pool.has_hash(&hash));
                    }
                    Command::Get { hash, reply } => {
                        let _ = reply.send(pool.get_block(&hash).cloned());
                    }
                    Command::Remove { hash, reply } => {
                        let _ = reply.send(pool.remove_block(&hash));
                    }
                    Command::RemoveMany { hashes, reply } => {
                        for hash in &hashes {
                            pool.remove_block(hash);
                        }
                        let _ = reply.send(());
                    }
                    Command::ChildrenOf { prev, reply } => {
                        let blocks = pool
                            .get_blocks_by_prev_hash(&prev)
                            .into_iter()
                            .cloned()
                            .collect();
                        let _ = reply.send(blocks);
                    }
                    Command::LongestChainFrom { from, reply } => {
                        let _ = reply.send(pool.get_longest_chain(&from));
                    }
                    Command::FinalChainFrom { from, reply } => {
                        let _ = reply.send(pool.get_final_chain(&from));
                    }
                    Command::MissingParents { reply } => {
                        let _ = reply.send(pool.missing_parents());
                    }
                    Command::Sweep { final_height, reply } => {
                        let _ = reply.send(pool.evict_outdated(final_height, eviction_threshold));
                    }
                    Command::Len { reply } => {
                        let _ = reply.send(pool.len());
                    }
                    Command::BlockList { reply } => {
                        let _ = reply.send(pool.block_list());
                    }
                }
            }
        });
        Self { tx }
    }

    pub async fn add_block(&self, block: Block) -> Result<bool> {
        self.round_trip(|reply| Command::Add {
            block: Box::new(block),
            reply,
        })
        .await
    }

    pub async fn has_hash(&self, hash: Hash32) -> Result<bool> {
        self.round_trip(|reply| Command::Contains { hash, reply }).await
    }

    pub async fn get_block(&self, hash: Hash32) -> Result<Option<Block>> {
        self.round_trip(|reply| Command::Get { hash, reply }).await
    }

    pub async fn remove_block(&self, hash: Hash32) -> Result<Option<Block>> {
        self.round_trip(|reply| Command::Remove { hash, reply }).await
    }

    pub async fn remove_blocks(&self, hashes: Vec<Hash32>) -> Result<()> {
        self.round_trip(|reply| Command::RemoveMany { hashes, reply })
            .await
    }

    pub async fn blocks_by_prev_hash(&self, prev: Hash32) -> Result<Vec<Block>> {
        self.round_trip(|reply| Command::ChildrenOf { prev, reply })
            .await
    }

    pub async fn longest_chain(&self, from: Hash32) -> Result<Vec<Block>> {
        self.round_trip(|reply| Command::LongestChainFrom { from, reply })
            .await
    }

    pub async fn final_chain(&self, from: Hash32) -> Result<Vec<Block>> {
        self.round_trip(|reply| Command::FinalChainFrom { from, reply })
            .await
    }

    pub async fn missing_parents(&self) -> Result<Vec<Hash32>> {
        self.round_trip(|reply| Command::MissingParents { reply }).await
    }

    /// Evict entries at or below `final_height` if the pool has grown past
    /// its threshold.
    pub async fn sweep(&self, final_height: u64) -> Result<usize> {
        self.round_trip(|reply| Command::Sweep { final_height, reply })
            .await
    }

    pub async fn pool_size(&self) -> Result<usize> {
        self.round_trip(|reply| Command::Len { reply }).await
    }

    pub async fn block_list(&self) -> Result<Vec<Block>> {
        self.round_trip(|reply| Command::BlockList { reply }).await
    }

    async fn round_trip<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| anyhow!("block pool task is gone"))?;
        Ok(rx.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use containers::{BlockHeader, ChainId, ShardBlock};

    fn block(height: u64, prev: Hash32, salt: u64) -> Block {
        Block::Shard(ShardBlock {
            header: BlockHeader::new(
                ChainId::Shard(0),
                height,
                prev,
                height * 1_000 + salt,
                Hash32::repeat(0xcc),
                Hash32::ZERO,
            ),
            beacon_height: height,
            tx_root: Hash32::ZERO,
            instructions: vec![],
        })
    }

    #[test]
    fn test_add_is_idempotent_on_hash() {
        let mut pool = BlockPool::new();
        let b = block(1, Hash32::ZERO, 0);
        assert!(pool.add_block(b.clone()));
        assert!(!pool.add_block(b.clone()));
        assert_eq!(pool.len(), 1);
        assert!(pool.has_hash(&b.hash()));
    }

    #[test]
    fn test_remove_fixes_adjacency() {
        let mut pool = BlockPool::new();
        let parent = block(1, Hash32::ZERO, 0);
        let child = block(2, parent.hash(), 0);
        pool.add_block(parent.clone());
        pool.add_block(child.clone());

        assert_eq!(pool.get_blocks_by_prev_hash(&parent.hash()).len(), 1);
        pool.remove_block(&child.hash());
        assert!(pool.get_blocks_by_prev_hash(&parent.hash()).is_empty());
        assert!(pool.has_hash(&parent.hash()));
    }

    #[test]
    fn test_longest_chain_prefers_deeper_fork() {
        let mut pool = BlockPool::new();
        let root_hash = Hash32::repeat(0xaa);
        // Short fork: one block. Long fork: three blocks.
        let short = block(2, root_hash, 7);
        let long_a = block(2, root_hash, 0);
        let long_b = block(3, long_a.hash(), 0);
        let long_c = block(4, long_b.hash(), 0);
        for b in [&short, &long_a, &long_b, &long_c] {
            pool.add_block((*b).clone());
        }

        let chain = pool.get_longest_chain(&root_hash);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].hash(), long_a.hash());
        assert_eq!(chain[2].hash(), long_c.hash());
    }

    #[test]
    fn test_final_chain_stops_at_fork() {
        let mut pool = BlockPool::new();
        let root_hash = Hash32::repeat(0xaa);
        let a = block(2, root_hash, 0);
        let b = block(3, a.hash(), 0);
        // Two children under b: the walk must stop there.
        let fork_one = block(4, b.hash(), 0);
        let fork_two = block(4, b.hash(), 7);
        for blk in [&a, &b, &fork_one, &fork_two] {
            pool.add_block((*blk).clone());
        }

        let chain = pool.get_final_chain(&root_hash);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].hash(), a.hash());
        assert_eq!(chain[1].hash(), b.hash());
    }

    #[test]
    fn test_missing_parents_deduplicated() {
        let mut pool = BlockPool::new();
        let unknown = Hash32::repeat(0x77);
        pool.add_block(block(5, unknown, 0));
        pool.add_block(block(5, unknown, 1));
        let parent = block(1, Hash32::ZERO, 0);
        pool.add_block(parent.clone());
        pool.add_block(block(2, parent.hash(), 0));

        let missing = pool.missing_parents();
        assert_eq!(missing, vec![unknown]);
    }

    #[test]
    fn test_eviction_waits_for_threshold() {
        let mut pool = BlockPool::new();
        let mut prev = Hash32::ZERO;
        for height in 1..=6 {
            let b = block(height, prev, 0);
            prev = b.hash();
            pool.add_block(b);
        }

        // Below the threshold nothing moves.
        assert_eq!(pool.evict_outdated(3, 10), 0);
        assert_eq!(pool.len(), 6);

        // Past the threshold, entries at or below final height go.
        assert_eq!(pool.evict_outdated(3, 5), 3);
        assert_eq!(pool.len(), 3);
        assert!(pool.block_list().iter().all(|b| b.height() > 3));
    }

    #[tokio::test]
    async fn test_handle_round_trips() {
        let handle = BlockPoolHandle::spawn(BlockPool::new(), 1_000);
        let parent = block(1, Hash32::ZERO, 0);
        let child = block(2, parent.hash(), 0);

        assert!(handle.add_block(parent.clone()).await.unwrap());
        assert!(handle.add_block(child.clone()).await.unwrap());
        assert!(!handle.add_block(child.clone()).await.unwrap());

        assert_eq!(handle.pool_size().await.unwrap(), 2);
        let chain = handle.longest_chain(parent.hash()).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].hash(), child.hash());

        handle.remove_blocks(vec![child.hash()]).await.unwrap();
        assert_eq!(handle.pool_size().await.unwrap(), 1);
    }
}
