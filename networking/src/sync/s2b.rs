use crate::requester::{BlockRequester, ChainSelector, StreamEvent};
use crate::sync::block_pool::{BlockPool, BlockPoolHandle};
use crate::sync::config::SyncConfig;
use crate::sync::peer_manager::{request_window, PeerManager};
use crate::sync::states::ProcessStatus;
use containers::{Block, ChainId, Hash32, Heartbeat};
use libp2p_identity::PeerId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Synchronization driver for one shard's condensed shard-to-beacon blocks,
/// run on the beacon side.
///
/// Gated on the shard chain's catch-up status, since a condensed view of a
/// stale shard is useless to beacon producers. Fetched blocks stage in a
/// pool; the producer pulls the longest safely extendable prefix and
/// confirms what it consumed.
pub struct ShardToBeaconSyncProcess {
    shard: u8,
    shard_caught_up: Arc<AtomicBool>,
    network: Arc<dyn BlockRequester>,
    peers: Arc<Mutex<PeerManager>>,
    pool: BlockPoolHandle,
    /// Highest shard height the beacon has consumed.
    confirmed_height: AtomicU64,
    status: Mutex<ProcessStatus>,
    config: SyncConfig,
}

impl ShardToBeaconSyncProcess {
    pub fn new(
        shard: u8,
        shard_caught_up: Arc<AtomicBool>,
        network: Arc<dyn BlockRequester>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            shard,
            shard_caught_up,
            network,
            peers: Arc::new(Mutex::new(PeerManager::new(ChainId::Shard(shard)))),
            pool: BlockPoolHandle::spawn(BlockPool::new(), config.pool_eviction_threshold),
            confirmed_height: AtomicU64::new(0),
            status: Mutex::new(ProcessStatus::Stopped),
            config,
        })
    }

    pub fn shard(&self) -> u8 {
        self.shard
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
        self.peers.lock().on_heartbeat(peer, heartbeat);
    }

    /// The beacon producer confirms consumption through `height`; older
    /// staged blocks are swept on the next pass.
    pub fn confirm_through(&self, height: u64) {
        self.confirmed_height.fetch_max(height, Ordering::SeqCst);
    }

    pub fn confirmed_height(&self) -> u64 {
        self.confirmed_height.load(Ordering::SeqCst)
    }

    /// The longest safely extendable prefix of staged blocks above
    /// `from_hash`, for the beacon producer.
    pub async fn extendable_chain(&self, from_hash: Hash32) -> Vec<Block> {
        self.pool.final_chain(from_hash).await.unwrap_or_default()
    }

    pub fn pool(&self) -> &BlockPoolHandle {
        &self.pool
    }

    async fn run(self: Arc<Self>) {
        info!(shard = self.shard, "Shard-to-beacon sync driver started");
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
        info!(shard = self.shard, "Shard-to-beacon sync driver stopped");
    }

    async fn sync_pass(&self) -> usize {
        self.peers.lock().prune_stale(self.config.staleness);

        let confirmed = self.confirmed_height();
        let frontier = self.staged_frontier(confirmed).await;
        let target = self.peers.lock().peers_ahead_of(frontier).first().copied();
        let Some((peer, peer_best)) = target else {
            return 0;
        };
        let Some(window) = request_window(frontier, peer_best, self.config.max_request_window)
        else {
            return 0;
        };

        if let Err(err) = self.stream_window(peer, window.from, window.to).await {
            warn!(shard = self.shard, %err, "Shard-to-beacon fetch failed");
        }
        let _ = self.pool.sweep(confirmed).await;
        1
    }

    /// Highest contiguously staged height above what was confirmed.
    async fn staged_frontier(&self, confirmed: u64) -> u64 {
        let Ok(blocks) = self.pool.block_list().await else {
            return confirmed;
        };
        let mut frontier = confirmed;
        for block in blocks {
            if block.height() == frontier + 1 {
                frontier += 1;
            } else if block.height() > frontier + 1 {
                break;
            }
        }
        frontier
    }

    async fn stream_window(&self, peer: PeerId, from: u64, to: u64) -> anyhow::Result<()> {
        let selector = ChainSelector::ShardToBeacon(self.shard);
        debug!(peer = %peer, %selector, from, to, "Requesting shard-to-beacon blocks");
        let mut stream = self
            .network
            .request_blocks_by_range(peer, selector, from, to)
            .await?;

        let deadline = Instant::now() + self.config.stream_timeout;
        loop {
            match stream.next_before(deadline).await {
                StreamEvent::Block(block @ Block::ShardToBeacon(_)) => {
                    let _ = self.pool.add_block(block).await;
                }
                StreamEvent::Block(_) => {
                    debug!(%selector, "Discarding non-condensed block from stream");
                }
                StreamEvent::End => break,
                StreamEvent::Cut | StreamEvent::TimedOut => break,
            }
        }
        Ok(())
    }
}
