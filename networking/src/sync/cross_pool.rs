use anyhow::{anyhow, Result};
use containers::CrossShardBlock;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Staging area for cross-shard blocks awaiting consumption by the target
/// shard, keyed by source shard and source-block height.
///
/// Cross-shard blocks are consumed strictly in source-height order, so the
/// useful queries are the next contiguous successor after a confirmed
/// height and the length of the contiguous run available.
#[derive(Debug, Default, Clone)]
pub struct CrossBlockPool {
    by_source: BTreeMap<u8, BTreeMap<u64, CrossShardBlock>>,
}

impl CrossBlockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent on (source shard, height): a later duplicate never
    /// displaces what was already staged.
    pub fn add_block(&mut self, block: CrossShardBlock) -> bool {
        let heights = self.by_source.entry(block.source_shard).or_default();
        let height = block.header.height;
        if heights.contains_key(&height) {
            return false;
        }
        heights.insert(height, block);
        true
    }

    pub fn has(&self, source: u8, height: u64) -> bool {
        self.by_source
            .get(&source)
            .map(|heights| heights.contains_key(&height))
            .unwrap_or(false)
    }

    /// The lowest staged block from `source` above `after`.
    pub fn next_block(&self, source: u8, after: u64) -> Option<&CrossShardBlock> {
        self.by_source
            .get(&source)?
            .range(after + 1..)
            .next()
            .map(|(_, block)| block)
    }

    /// Highest height `h` such that every height in `(after, h]` from
    /// `source` is staged. Equals `after` when the successor is missing.
    pub fn contiguous_until(&self, source: u8, after: u64) -> u64 {
        let Some(heights) = self.by_source.get(&source) else {
            return after;
        };
        let mut cursor = after;
        while heights.contains_key(&(cursor + 1)) {
            cursor += 1;
        }
        cursor
    }

    /// Drop all blocks from `source` at or below `height`; they were
    /// consumed or superseded.
    pub fn remove_through(&mut self, source: u8, height: u64) -> usize {
        let Some(heights) = self.by_source.get_mut(&source) else {
            return 0;
        };
        let keep = heights.split_off(&(height + 1));
        let removed = heights.len();
        *heights = keep;
        if removed > 0 {
            debug!(source, through = height, removed, "Dropped consumed cross-shard blocks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_source.values().map(|heights| heights.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source_len(&self, source: u8) -> usize {
        self.by_source
            .get(&source)
            .map(|heights| heights.len())
            .unwrap_or(0)
    }

    pub fn block_list(&self, source: u8) -> Vec<CrossShardBlock> {
        self.by_source
            .get(&source)
            .map(|heights| heights.values().cloned().collect())
            .unwrap_or_default()
    }
}

enum Command {
    Add {
        block: Box<CrossShardBlock>,
        reply: oneshot::Sender<bool>,
    },
    Next {
        source: u8,
        after: u64,
        reply: oneshot::Sender<Option<CrossShardBlock>>,
    },
    ContiguousUntil {
        source: u8,
        after: u64,
        reply: oneshot::Sender<u64>,
    },
    RemoveThrough {
        source: u8,
        height: u64,
        reply: oneshot::Sender<usize>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
    BlockList {
        source: u8,
        reply: oneshot::Sender<Vec<CrossShardBlock>>,
    },
}

/// Mailbox front-end for a [`CrossBlockPool`] running on its own task.
#[derive(Clone)]
pub struct CrossPoolHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CrossPoolHandle {
    pub fn spawn(mut pool: CrossBlockPool) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Add { block, reply } => {
                        let _ = reply.send(pool.add_block(*block));
                    }
                    Command::Next { source, after, reply } => {
                        let _ = reply.send(pool.next_block(source, after).cloned());
                    }
                    Command::ContiguousUntil { source, after, reply } => {
                        let _ = reply.send(pool.contiguous_until(source, after));
                    }
                    Command::RemoveThrough { source, height, reply } => {
                        let _ = reply.send(pool.remove_through(source, height));
                    }
                    Command::Len { reply } => {
                        let _ = reply.send(pool.len());
                    }
                    Command::BlockList { source, reply } => {
                        let _ = reply.send(pool.block_list(source));
                    }
                }
            }
        });
        Self { tx }
    }

    pub async fn add_block(&self, block: CrossShardBlock) -> Result<bool> {
        self.round_trip(|reply| Command::Add {
            block: Box::new(block),
            reply,
        })
        .await
    }

    pub async fn next_block(&self, source: u8, after: u64) -> Result<Option<CrossShardBlock>> {
        self.round_trip(|reply| Command::Next { source, after, reply })
            .await
    }

    pub async fn contiguous_until(&self, source: u8, after: u64) -> Result<u64> {
        self.round_trip(|reply| Command::ContiguousUntil { source, after, reply })
            .await
    }

    pub async fn remove_through(&self, source: u8, height: u64) -> Result<usize> {
        self.round_trip(|reply| Command::RemoveThrough { source, height, reply })
            .await
    }

    pub async fn pool_size(&self) -> Result<usize> {
        self.round_trip(|reply| Command::Len { reply }).await
    }

    pub async fn block_list(&self, source: u8) -> Result<Vec<CrossShardBlock>> {
        self.round_trip(|reply| Command::BlockList { source, reply })
            .await
    }

    async fn round_trip<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| anyhow!("cross-shard pool task is gone"))?;
        Ok(rx.await?)
    }
}
