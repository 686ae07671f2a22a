use crate::requester::{BlockRequester, ChainSelector, StreamEvent};
use crate::sync::config::SyncConfig;
use crate::sync::peer_manager::PeerManager;
use crate::sync::range_tracker::{HeightRange, RangeTracker};
use crate::sync::SyncError;
use anyhow::{anyhow, Result};
use containers::Block;
use libp2p_identity::PeerId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

/// Requests consumed by the resynchronization command loop.
pub enum ResyncRequest {
    /// Catch up a single height.
    CatchUp { height: u64 },
    /// Catch up an explicit range.
    Range { from: u64, to: u64 },
    /// Bulk delivery of blocks fetched elsewhere; covers their ranges
    /// without issuing requests.
    PreSync { blocks: Vec<Block> },
    /// A cached range's lifetime ended; its buffered data is released.
    Expired { range: HeightRange },
    /// Report the uncovered sub-ranges of a window.
    Gaps {
        from: u64,
        to: u64,
        reply: oneshot::Sender<Vec<HeightRange>>,
    },
}

struct CacheEntry {
    expires_at: Instant,
    range: HeightRange,
}

/// Bulk historical catch-up for one chain, distinct from steady-state
/// tip-following.
///
/// A single task consumes the request mailbox in arrival order. Covered
/// ranges live in a [`RangeTracker`] so overlapping requests are narrowed
/// to what is actually missing, and every covered range carries a TTL:
/// on expiry the buffered block data for that exact range is deleted and
/// the range becomes eligible for re-fetch. Memory is bounded by the
/// ranges being actively synchronized, not by everything ever synced.
pub struct ResyncManager {
    selector: ChainSelector,
    tracker: RangeTracker,
    cache: VecDeque<CacheEntry>,
    data: Arc<Mutex<BTreeMap<u64, Block>>>,
    peers: Arc<Mutex<PeerManager>>,
    network: Arc<dyn BlockRequester>,
    config: SyncConfig,
    mailbox: mpsc::UnboundedSender<ResyncRequest>,
}

impl ResyncManager {
    /// Start the command loop and return its handle.
    pub fn spawn(
        selector: ChainSelector,
        peers: Arc<Mutex<PeerManager>>,
        network: Arc<dyn BlockRequester>,
        config: SyncConfig,
    ) -> ResyncHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let data = Arc::new(Mutex::new(BTreeMap::new()));
        let manager = ResyncManager {
            selector,
            tracker: RangeTracker::new(config.range_merge_span),
            cache: VecDeque::new(),
            data: Arc::clone(&data),
            peers,
            network,
            config,
            mailbox: tx.clone(),
        };
        tokio::spawn(manager.run(rx));
        ResyncHandle { tx, data }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ResyncRequest>) {
        loop {
            let next_expiry = self.cache.front().map(|entry| entry.expires_at);
            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else { break };
                    self.handle(request).await;
                }
                _ = async {
                    match next_expiry {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.expire_due();
                }
            }
        }
    }

    async fn handle(&mut self, request: ResyncRequest) {
        match request {
            ResyncRequest::CatchUp { height } => self.resync_range(height, height).await,
            ResyncRequest::Range { from, to } => self.resync_range(from, to).await,
            ResyncRequest::PreSync { blocks } => self.pre_sync(blocks),
            ResyncRequest::Expired { range } => self.evict(range),
            ResyncRequest::Gaps { from, to, reply } => {
                let _ = reply.send(self.tracker.missing_subranges(from, to));
            }
        }
    }

    async fn resync_range(&mut self, from: u64, to: u64) {
        if from > to {
            return;
        }
        if !self.network.is_ready() {
            // Not a failure; try again shortly.
            debug!(selector = %self.selector, from, to, "Network not ready, requeueing resync");
            let mailbox = self.mailbox.clone();
            let delay = self.config.requeue_delay;
            tokio::spawn(async move {
                sleep(delay).await;
                let _ = mailbox.send(ResyncRequest::Range { from, to });
            });
            return;
        }

        for gap in self.tracker.missing_subranges(from, to) {
            if let Err(err) = self.fetch_gap(gap).await {
                warn!(selector = %self.selector, %err, "Resync fetch incomplete");
            }
        }
    }

    /// Fetch one missing sub-range with bounded retries, narrowing to the
    /// unconfirmed suffix after every partial delivery.
    async fn fetch_gap(&mut self, gap: HeightRange) -> Result<(), SyncError> {
        let Some(peer) = self.pick_peer(gap.from) else {
            return Err(SyncError::NoPeer {
                from: gap.from,
                to: gap.to,
            });
        };

        let mut cursor = gap.from;
        let mut attempts = 0u32;
        while cursor <= gap.to && attempts < self.config.resync_retries {
            attempts += 1;
            let mut stream = match self
                .network
                .request_blocks_by_range(peer, self.selector, cursor, gap.to)
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(selector = %self.selector, peer = %peer, %err, "Resync request refused");
                    continue;
                }
            };

            let deadline = Instant::now() + self.config.stream_timeout;
            let start = cursor;
            loop {
                match stream.next_before(deadline).await {
                    StreamEvent::Block(block) => {
                        let height = block.height();
                        if height < cursor || height > gap.to {
                            continue;
                        }
                        self.data.lock().insert(height, block);
                        if height == cursor {
                            cursor += 1;
                        }
                    }
                    StreamEvent::End => break,
                    StreamEvent::Cut | StreamEvent::TimedOut => break,
                }
            }

            if cursor > start {
                // The confirmed prefix is covered and cached; anything
                // beyond it is re-requested as the remaining suffix.
                self.cover(HeightRange::new(start, cursor - 1));
                attempts = 0;
            }
        }

        if cursor <= gap.to {
            return Err(SyncError::MissingRange {
                from: cursor,
                to: gap.to,
                attempts: self.config.resync_retries,
            });
        }
        Ok(())
    }

    /// Accept blocks fetched elsewhere and mark their contiguous height
    /// runs as covered.
    fn pre_sync(&mut self, blocks: Vec<Block>) {
        if blocks.is_empty() {
            return;
        }
        let mut heights: Vec<u64> = blocks.iter().map(Block::height).collect();
        heights.sort_unstable();
        heights.dedup();
        {
            let mut data = self.data.lock();
            for block in blocks {
                data.insert(block.height(), block);
            }
        }

        let mut run_start = heights[0];
        let mut previous = heights[0];
        for &height in &heights[1..] {
            if height == previous + 1 {
                previous = height;
                continue;
            }
            self.cover(HeightRange::new(run_start, previous));
            run_start = height;
            previous = height;
        }
        self.cover(HeightRange::new(run_start, previous));
    }

    fn cover(&mut self, range: HeightRange) {
        debug!(selector = %self.selector, %range, "Range covered");
        self.tracker.insert_range(range.from, range.to);
        self.cache.push_back(CacheEntry {
            expires_at: Instant::now() + self.config.resync_ttl,
            range,
        });
    }

    fn expire_due(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.cache.front() {
            if entry.expires_at > now {
                break;
            }
            let entry = self.cache.pop_front().expect("front checked above");
            self.evict(entry.range);
        }
    }

    /// Release one cached range: delete its buffered block data and drop
    /// its coverage so it may be fetched again later. Inconsistencies here
    /// (data already consumed, coverage already released) are logged and
    /// skipped, never fatal.
    fn evict(&mut self, range: HeightRange) {
        let mut dropped = 0usize;
        {
            let mut data = self.data.lock();
            for height in range.from..=range.to {
                if data.remove(&height).is_some() {
                    dropped += 1;
                }
            }
        }
        if self.tracker.find(range.from).is_none() {
            debug!(selector = %self.selector, %range, "Expired range already released");
        }
        self.tracker.release_range(range.from, range.to);
        debug!(selector = %self.selector, %range, dropped, "Expired resync range");
    }

    fn pick_peer(&self, min_height: u64) -> Option<PeerId> {
        let peers = self.peers.lock();
        peers
            .peers_ahead_of(min_height.saturating_sub(1))
            .first()
            .map(|(peer, _)| *peer)
    }
}

/// Handle to a running [`ResyncManager`].
///
/// Commands are fire-and-forget except [`ResyncHandle::gaps`]; buffered
/// block data is drained synchronously through the shared map, which is the
/// one mutex-guarded structure of the manager.
#[derive(Clone)]
pub struct ResyncHandle {
    tx: mpsc::UnboundedSender<ResyncRequest>,
    data: Arc<Mutex<BTreeMap<u64, Block>>>,
}

impl ResyncHandle {
    pub fn catch_up(&self, height: u64) {
        let _ = self.tx.send(ResyncRequest::CatchUp { height });
    }

    pub fn request_range(&self, from: u64, to: u64) {
        let _ = self.tx.send(ResyncRequest::Range { from, to });
    }

    pub fn pre_sync(&self, blocks: Vec<Block>) {
        let _ = self.tx.send(ResyncRequest::PreSync { blocks });
    }

    /// Uncovered sub-ranges of `[from, to]`, as the command loop sees them.
    pub async fn gaps(&self, from: u64, to: u64) -> Result<Vec<HeightRange>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ResyncRequest::Gaps { from, to, reply })
            .map_err(|_| anyhow!("resync task is gone"))?;
        Ok(rx.await?)
    }

    /// Drain the contiguous run of buffered blocks starting at `from`.
    pub fn take_from(&self, from: u64) -> Vec<Block> {
        let mut data = self.data.lock();
        let mut blocks = Vec::new();
        let mut height = from;
        while let Some(block) = data.remove(&height) {
            blocks.push(block);
            height += 1;
        }
        blocks
    }

    pub fn buffered_len(&self) -> usize {
        self.data.lock().len()
    }
}
