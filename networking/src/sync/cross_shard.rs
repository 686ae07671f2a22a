use crate::requester::{BlockRequester, ChainSelector, StreamEvent};
use crate::sync::config::SyncConfig;
use crate::sync::cross_pool::{CrossBlockPool, CrossPoolHandle};
use crate::sync::peer_manager::{request_window, PeerManager};
use crate::sync::states::ProcessStatus;
use containers::{Block, ChainId, CrossShardBlock, Heartbeat};
use libp2p_identity::PeerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Synchronization driver for cross-shard blocks destined for one shard.
///
/// Cross-shard inputs are only meaningful relative to an up-to-date local
/// shard view, so the driver idles until the owning shard reports caught-up.
/// For each source shard it advances a contiguous frontier: the consumer
/// confirms heights as it applies them, everything staged beyond the
/// confirmed frontier waits in the pool.
pub struct CrossShardSyncProcess {
    target_shard: u8,
    sources: Vec<u8>,
    shard_caught_up: Arc<AtomicBool>,
    network: Arc<dyn BlockRequester>,
    peers: Mutex<HashMap<u8, PeerManager>>,
    pool: CrossPoolHandle,
    /// Highest height per source the consumer has applied.
    confirmed: Mutex<HashMap<u8, u64>>,
    status: Mutex<ProcessStatus>,
    config: SyncConfig,
}

impl CrossShardSyncProcess {
    pub fn new(
        target_shard: u8,
        sources: Vec<u8>,
        shard_caught_up: Arc<AtomicBool>,
        network: Arc<dyn BlockRequester>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let peers = sources
            .iter()
            .map(|&source| (source, PeerManager::new(ChainId::Shard(source))))
            .collect();
        Arc::new(Self {
            target_shard,
            sources,
            shard_caught_up,
            network,
            peers: Mutex::new(peers),
            pool: CrossPoolHandle::spawn(CrossBlockPool::new()),
            confirmed: Mutex::new(HashMap::new()),
            status: Mutex::new(ProcessStatus::Stopped),
            config,
        })
    }

    pub fn start(self: Arc<Self>) {
        {
            let mut status = self.status.lock();
            if !status.can_transition_to(ProcessStatus::Running) {
                return;
            }
            *status = ProcessStatus::Running;
        }
        tokio::spawn(async move { self.run().await });
    }

    pub fn stop(&self) {
        let mut status = self.status.lock();
        if status.can_transition_to(ProcessStatus::Stopped) {
            *status = ProcessStatus::Stopped;
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.lock().is_running()
    }

    pub fn on_heartbeat(&self, peer: PeerId, heartbeat: &Heartbeat) {
        let mut peers = self.peers.lock();
        for manager in peers.values_mut() {
            manager.on_heartbeat(peer, heartbeat);
        }
    }

    /// The consumer confirms cross-shard heights from `source` through
    /// `height`; the staged prefix is dropped.
    pub async fn confirm_through(&self, source: u8, height: u64) {
        self.confirmed.lock().insert(source, height);
        let _ = self.pool.remove_through(source, height).await;
    }

    /// Next unconsumed cross-shard block from `source`.
    pub async fn next_block(&self, source: u8) -> Option<CrossShardBlock> {
        let after = self.confirmed.lock().get(&source).copied().unwrap_or(0);
        self.pool.next_block(source, after).await.ok().flatten()
    }

    pub fn pool(&self) -> &CrossPoolHandle {
        &self.pool
    }

    async fn run(self: Arc<Self>) {
        info!(shard = self.target_shard, "Cross-shard sync driver started");
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_running() {
            ticker.tick().await;
            if !self.shard_caught_up.load(Ordering::SeqCst) {
                continue;
            }
            let requests = self.sync_pass().await;
            if requests == 0 {
                sleep(self.config.idle_backoff).await;
            }
        }
        info!(shard = self.target_shard, "Cross-shard sync driver stopped");
    }

    async fn sync_pass(&self) -> usize {
        {
            let mut peers = self.peers.lock();
            for manager in peers.values_mut() {
                manager.prune_stale(self.config.staleness);
            }
        }

        let mut requests = 0;
        for &source in &self.sources {
            let confirmed = self.confirmed.lock().get(&source).copied().unwrap_or(0);
            let frontier = match self.pool.contiguous_until(source, confirmed).await {
                Ok(frontier) => frontier,
                Err(_) => continue,
            };
            let target = {
                let peers = self.peers.lock();
                peers
                    .get(&source)
                    .and_then(|manager| manager.peers_ahead_of(frontier).first().copied())
            };
            let Some((peer, peer_best)) = target else {
                continue;
            };
            let Some(window) = request_window(frontier, peer_best, self.config.max_request_window)
            else {
                continue;
            };
            requests += 1;
            if let Err(err) = self.stream_window(peer, source, window.from, window.to).await {
                warn!(source, to_shard = self.target_shard, %err, "Cross-shard fetch failed");
            }
        }
        requests
    }

    async fn stream_window(
        &self,
        peer: PeerId,
        source: u8,
        from: u64,
        to: u64,
    ) -> anyhow::Result<()> {
        let selector = ChainSelector::CrossShard {
            source,
            target: self.target_shard,
        };
        debug!(peer = %peer, %selector, from, to, "Requesting cross-shard blocks");
        let mut stream = self
            .network
            .request_blocks_by_range(peer, selector, from, to)
            .await?;

        let deadline = Instant::now() + self.config.stream_timeout;
        loop {
            match stream.next_before(deadline).await {
                StreamEvent::Block(Block::CrossShard(block)) => {
                    if block.target_shard != self.target_shard || block.source_shard != source {
                        debug!(%selector, "Discarding misrouted cross-shard block");
                        continue;
                    }
                    let _ = self.pool.add_block(block).await;
                }
                StreamEvent::Block(_) => {
                    debug!(%selector, "Discarding non-cross-shard block from stream");
                }
                StreamEvent::End => break,
                StreamEvent::Cut | StreamEvent::TimedOut => break,
            }
        }
        Ok(())
    }
}
