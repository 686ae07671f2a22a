use crate::requester::{BlockRequester, BlockStream, ChainSelector, StreamItem};
use anyhow::Result;
use async_trait::async_trait;
use chain::{Chain, MemChain};
use containers::{
    BeaconBlock, Block, BlockHeader, ChainId, Committee, CrossShardBlock, Hash32, ShardBlock,
    ShardToBeaconBlock,
};
use libp2p_identity::PeerId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const COMMITTEE_ROOT: Hash32 = Hash32([0xcc; 32]);

pub fn beacon_block(height: u64, prev: Hash32) -> Block {
    Block::Beacon(BeaconBlock {
        header: BlockHeader::new(
            ChainId::Beacon,
            height,
            prev,
            height * 1_000,
            COMMITTEE_ROOT,
            Hash32::ZERO,
        ),
        shard_states: vec![],
        instructions: vec![],
    })
}

/// Hash-chained beacon blocks `from..=to` extending `prev`.
pub fn beacon_blocks(from: u64, to: u64, mut prev: Hash32) -> Vec<Block> {
    let mut blocks = Vec::new();
    for height in from..=to {
        let block = beacon_block(height, prev);
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

pub fn shard_block(shard: u8, height: u64, prev: Hash32, beacon_ref: u64) -> Block {
    Block::Shard(ShardBlock {
        header: BlockHeader::new(
            ChainId::Shard(shard),
            height,
            prev,
            height * 1_000,
            COMMITTEE_ROOT,
            Hash32::ZERO,
        ),
        beacon_height: beacon_ref,
        tx_root: Hash32::ZERO,
        instructions: vec![],
    })
}

/// Hash-chained shard blocks `from..=to`, all referencing `beacon_ref`.
pub fn shard_blocks(shard: u8, from: u64, to: u64, mut prev: Hash32, beacon_ref: u64) -> Vec<Block> {
    let mut blocks = Vec::new();
    for height in from..=to {
        let block = shard_block(shard, height, prev, beacon_ref);
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

pub fn s2b_blocks(shard: u8, from: u64, to: u64, mut prev: Hash32) -> Vec<Block> {
    let mut blocks = Vec::new();
    for height in from..=to {
        let block = Block::ShardToBeacon(ShardToBeaconBlock {
            header: BlockHeader::new(
                ChainId::Shard(shard),
                height,
                prev,
                height * 1_000,
                COMMITTEE_ROOT,
                Hash32::ZERO,
            ),
            shard,
            instructions: vec![],
        });
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

pub fn cross_block(source: u8, target: u8, height: u64) -> CrossShardBlock {
    CrossShardBlock {
        header: BlockHeader::new(
            ChainId::Shard(source),
            height,
            Hash32::repeat(height as u8),
            height * 1_000,
            COMMITTEE_ROOT,
            Hash32::ZERO,
        ),
        source_shard: source,
        target_shard: target,
        outputs: vec![],
    }
}

/// A chain with its committee installed and a genesis block committed.
/// Returns the chain and the genesis hash.
pub fn genesis_chain(id: ChainId) -> (Arc<MemChain>, Hash32) {
    let chain = MemChain::new(id).with_committee(1, Committee::new(COMMITTEE_ROOT, 0, vec![]));
    let genesis = match id {
        ChainId::Beacon => beacon_block(1, Hash32::ZERO),
        ChainId::Shard(shard) => shard_block(shard, 1, Hash32::ZERO, 1),
    };
    chain.insert_block(&genesis, true).unwrap();
    (Arc::new(chain), genesis.hash())
}

/// Scripted transport: serves height ranges out of a per-selector ledger,
/// records every request, and can cut one response short.
pub struct MockNetwork {
    ready: AtomicBool,
    ledger: Mutex<HashMap<ChainSelector, BTreeMap<u64, Block>>>,
    by_hash: Mutex<HashMap<Hash32, Block>>,
    range_requests: Mutex<Vec<(ChainSelector, u64, u64)>>,
    hash_requests: Mutex<Vec<(ChainSelector, usize)>>,
    truncate_once: Mutex<HashMap<ChainSelector, u64>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            ledger: Mutex::new(HashMap::new()),
            by_hash: Mutex::new(HashMap::new()),
            range_requests: Mutex::new(Vec::new()),
            hash_requests: Mutex::new(Vec::new()),
            truncate_once: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn stock(&self, selector: ChainSelector, blocks: Vec<Block>) {
        let mut ledger = self.ledger.lock();
        let entry = ledger.entry(selector).or_default();
        let mut by_hash = self.by_hash.lock();
        for block in blocks {
            by_hash.insert(block.hash(), block.clone());
            entry.insert(block.height(), block);
        }
    }

    /// Make blocks resolvable by hash without serving them in any range
    /// response.
    pub fn stock_hashes_only(&self, blocks: Vec<Block>) {
        let mut by_hash = self.by_hash.lock();
        for block in blocks {
            by_hash.insert(block.hash(), block);
        }
    }

    /// The next range response for `selector` stops after `last_height`
    /// and closes without the end sentinel.
    pub fn truncate_next_response_at(&self, selector: ChainSelector, last_height: u64) {
        self.truncate_once.lock().insert(selector, last_height);
    }

    pub fn range_requests(&self) -> Vec<(ChainSelector, u64, u64)> {
        self.range_requests.lock().clone()
    }

    pub fn hash_request_count(&self) -> usize {
        self.hash_requests.lock().len()
    }
}

#[async_trait]
impl BlockRequester for MockNetwork {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn request_blocks_by_range(
        &self,
        _peer: PeerId,
        selector: ChainSelector,
        from: u64,
        to: u64,
    ) -> Result<BlockStream> {
        self.range_requests.lock().push((selector, from, to));
        let limit = self.truncate_once.lock().remove(&selector);

        let mut blocks: Vec<Block> = {
            let ledger = self.ledger.lock();
            ledger
                .get(&selector)
                .map(|heights| heights.range(from..=to).map(|(_, b)| b.clone()).collect())
                .unwrap_or_default()
        };
        if let Some(last) = limit {
            blocks.retain(|block| block.height() <= last);
        }

        let (tx, stream) = BlockStream::channel(blocks.len() + 1);
        for block in blocks {
            let _ = tx.try_send(StreamItem::Block(block));
        }
        if limit.is_none() {
            let _ = tx.try_send(StreamItem::End);
        }
        Ok(stream)
    }

    async fn request_blocks_by_hash(
        &self,
        _peer: PeerId,
        selector: ChainSelector,
        hashes: Vec<Hash32>,
    ) -> Result<BlockStream> {
        self.hash_requests.lock().push((selector, hashes.len()));
        let blocks: Vec<Block> = {
            let by_hash = self.by_hash.lock();
            hashes
                .iter()
                .filter_map(|hash| by_hash.get(hash).cloned())
                .collect()
        };
        let (tx, stream) = BlockStream::channel(blocks.len() + 1);
        for block in blocks {
            let _ = tx.try_send(StreamItem::Block(block));
        }
        let _ = tx.try_send(StreamItem::End);
        Ok(stream)
    }
}

/// Install a subscriber once so `RUST_LOG` controls test output.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or `deadline_ms` elapses.
pub async fn wait_until(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}
