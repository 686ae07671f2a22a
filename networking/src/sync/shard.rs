use crate::requester::{BlockRequester, ChainSelector, StreamEvent};
use crate::sync::block_pool::{BlockPool, BlockPoolHandle};
use crate::sync::config::SyncConfig;
use crate::sync::ingest::{commit_run, contiguous_run, drain_pool};
use crate::sync::peer_manager::{request_window, PeerManager};
use crate::sync::range_tracker::HeightRange;
use crate::sync::resync::{ResyncHandle, ResyncManager};
use crate::sync::states::ProcessStatus;
use crate::sync::SyncError;
use chain::Chain;
use containers::{Block, ChainId, Heartbeat};
use fork_choice::{ConfirmRule, MultiView, MultiViewHandle, View};
use libp2p_identity::PeerId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Steady-state synchronization driver for one shard chain.
///
/// Same loop as the beacon driver, with one extra rule: a shard block may
/// not be consumed ahead of the beacon height it references. When a fetched
/// block points past the locally final beacon height, consumption of that
/// stream pauses until the beacon catches up or the stream deadline passes.
pub struct ShardSyncProcess {
    shard: u8,
    chain: Arc<dyn Chain>,
    beacon: Arc<dyn Chain>,
    network: Arc<dyn BlockRequester>,
    peers: Arc<Mutex<PeerManager>>,
    pool: BlockPoolHandle,
    multiview: MultiViewHandle,
    resync: ResyncHandle,
    status: Mutex<ProcessStatus>,
    caught_up: Arc<AtomicBool>,
    config: SyncConfig,
}

impl ShardSyncProcess {
    pub fn new(
        shard: u8,
        chain: Arc<dyn Chain>,
        beacon: Arc<dyn Chain>,
        network: Arc<dyn BlockRequester>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let peers = Arc::new(Mutex::new(PeerManager::new(ChainId::Shard(shard))));
        let pool = BlockPoolHandle::spawn(BlockPool::new(), config.pool_eviction_threshold);
        let multiview = MultiViewHandle::spawn(MultiView::new(ConfirmRule::SingleStep));
        let resync = ResyncManager::spawn(
            ChainSelector::Shard(shard),
            Arc::clone(&peers),
            Arc::clone(&network),
            config.clone(),
        );
        Arc::new(Self {
            shard,
            chain,
            beacon,
            network,
            peers,
            pool,
            multiview,
            resync,
            status: Mutex::new(ProcessStatus::Stopped),
            caught_up: Arc::new(AtomicBool::new(false)),
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

    pub fn is_caught_up(&self) -> bool {
        self.caught_up.load(Ordering::SeqCst)
    }

    /// Shared catch-up flag; gates the cross-shard and shard-to-beacon
    /// drivers that depend on this shard's view being current.
    pub fn caught_up_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.caught_up)
    }

    pub fn on_heartbeat(&self, peer: PeerId, heartbeat: &Heartbeat) {
        self.peers.lock().on_heartbeat(peer, heartbeat);
    }

    pub async fn ingest_local_block(&self, block: Block) -> Result<(), SyncError> {
        self.chain.insert_block(&block, true)?;
        if let Err(err) = self.multiview.add_view(View::from(&block)).await {
            warn!(%err, "Fork-choice update failed for local block");
        }
        Ok(())
    }

    pub fn multiview(&self) -> &MultiViewHandle {
        &self.multiview
    }

    pub fn pool(&self) -> &BlockPoolHandle {
        &self.pool
    }

    pub fn resync(&self) -> &ResyncHandle {
        &self.resync
    }

    async fn run(self: Arc<Self>) {
        info!(chain = %self.chain.id(), "Sync driver started");
        self.chain.set_ready(true);
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_running() {
            ticker.tick().await;
            let requests = self.sync_pass().await;
            if requests == 0 {
                if !self.peers.lock().is_empty() {
                    self.caught_up.store(true, Ordering::SeqCst);
                }
                sleep(self.config.idle_backoff).await;
            } else {
                self.caught_up.store(false, Ordering::SeqCst);
            }
        }
        info!(chain = %self.chain.id(), "Sync driver stopped");
    }

    async fn sync_pass(&self) -> usize {
        self.peers.lock().prune_stale(self.config.staleness);

        let frontier = self.chain.best_height();
        let targets = self.peers.lock().peers_ahead_of(frontier);
        let mut requests = 0;
        for (peer, peer_best) in targets {
            let frontier = self.chain.best_height();
            let Some(window) = request_window(frontier, peer_best, self.config.max_request_window)
            else {
                continue;
            };
            requests += 1;
            if let Err(err) = self.stream_window(peer, window).await {
                warn!(peer = %peer, shard = self.shard, %err, "Shard range fetch failed");
            }
            self.peers.lock().mark_processed(&peer);
        }

        let staged = self.resync.take_from(self.chain.best_height() + 1);
        if !staged.is_empty() {
            let (run, rest) = contiguous_run(self.chain.best_height(), &staged);
            commit_run(&*self.chain, &self.multiview, &self.pool, run).await;
            for block in rest {
                let _ = self.pool.add_block(block).await;
            }
        }

        drain_pool(&*self.chain, &self.multiview, &self.pool).await;
        let _ = self.pool.sweep(self.chain.final_height()).await;
        requests
    }

    async fn stream_window(&self, peer: PeerId, window: HeightRange) -> Result<(), SyncError> {
        debug!(peer = %peer, shard = self.shard, %window, "Requesting shard blocks");
        let mut stream = self
            .network
            .request_blocks_by_range(peer, ChainSelector::Shard(self.shard), window.from, window.to)
            .await
            .map_err(SyncError::Request)?;

        let deadline = Instant::now() + self.config.stream_timeout;
        let mut buffer: Vec<Block> = Vec::new();
        let mut last_flush = Instant::now();
        loop {
            match stream.next_before(deadline).await {
                StreamEvent::Block(block) => {
                    if !self.await_beacon_reference(&block, deadline).await {
                        // The beacon did not reach the referenced height in
                        // time; drop the rest of this stream for this pass.
                        debug!(
                            shard = self.shard,
                            height = block.height(),
                            reference = ?block.beacon_reference(),
                            "Abandoning stream ahead of beacon"
                        );
                        break;
                    }
                    buffer.push(block);
                    if buffer.len() >= self.config.flush_size
                        || last_flush.elapsed() >= self.config.flush_interval
                    {
                        self.flush(&buffer).await;
                        buffer.clear();
                        last_flush = Instant::now();
                    }
                }
                StreamEvent::End => break,
                StreamEvent::Cut | StreamEvent::TimedOut => {
                    debug!(peer = %peer, shard = self.shard, "Partial shard delivery kept");
                    break;
                }
            }
        }
        if !buffer.is_empty() {
            self.flush(&buffer).await;
        }
        Ok(())
    }

    /// Suspend until the block's beacon reference is locally final, the
    /// deadline passes, or the driver stops. Returns whether consumption
    /// may continue.
    async fn await_beacon_reference(&self, block: &Block, deadline: Instant) -> bool {
        let Some(reference) = block.beacon_reference() else {
            return true;
        };
        while self.beacon.final_height() < reference {
            if Instant::now() >= deadline || !self.is_running() {
                return false;
            }
            sleep(self.config.beacon_gate_poll).await;
        }
        true
    }

    async fn flush(&self, blocks: &[Block]) {
        let (run, rest) = contiguous_run(self.chain.best_height(), blocks);
        commit_run(&*self.chain, &self.multiview, &self.pool, run).await;
        for block in rest {
            let _ = self.pool.add_block(block).await;
        }
    }
}
