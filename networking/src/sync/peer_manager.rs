use crate::sync::range_tracker::HeightRange;
use containers::{ChainId, Hash32, Heartbeat};
use libp2p_identity::PeerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Last reported state of one peer for one chain, refreshed on every
/// heartbeat and expired when no heartbeat arrives within the staleness
/// window.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub received_at: Instant,
    pub best_height: u64,
    pub best_hash: Hash32,
    /// Whether the current driver pass already acted on this report.
    pub processed: bool,
}

/// Per-chain peer bookkeeping: heartbeat ingest, staleness pruning, and
/// request-window selection.
#[derive(Debug)]
pub struct PeerManager {
    chain: ChainId,
    peers: HashMap<PeerId, PeerState>,
}

impl PeerManager {
    pub fn new(chain: ChainId) -> Self {
        Self {
            chain,
            peers: HashMap::new(),
        }
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Record the tip this heartbeat reports for our chain, if any.
    pub fn on_heartbeat(&mut self, peer: PeerId, heartbeat: &Heartbeat) {
        if let Some(tip) = heartbeat.tip(self.chain) {
            self.record_tip(peer, tip.height, tip.hash);
        }
    }

    pub fn record_tip(&mut self, peer: PeerId, best_height: u64, best_hash: Hash32) {
        self.peers.insert(
            peer,
            PeerState {
                received_at: Instant::now(),
                best_height,
                best_hash,
                processed: false,
            },
        );
    }

    /// Drop peers whose last heartbeat is older than `window`. Staleness is
    /// not an error; a stale peer simply stops being a sync source.
    pub fn prune_stale(&mut self, window: Duration) -> usize {
        let before = self.peers.len();
        self.peers
            .retain(|_, state| state.received_at.elapsed() <= window);
        let pruned = before - self.peers.len();
        if pruned > 0 {
            debug!(chain = %self.chain, pruned, "Pruned stale peers");
        }
        pruned
    }

    pub fn remove_peer(&mut self, peer: &PeerId) -> Option<PeerState> {
        self.peers.remove(peer)
    }

    pub fn get_peer(&self, peer: &PeerId) -> Option<&PeerState> {
        self.peers.get(peer)
    }

    pub fn mark_processed(&mut self, peer: &PeerId) {
        if let Some(state) = self.peers.get_mut(peer) {
            state.processed = true;
        }
    }

    /// Peers whose reported best exceeds `frontier`, highest first.
    pub fn peers_ahead_of(&self, frontier: u64) -> Vec<(PeerId, u64)> {
        let mut ahead: Vec<(PeerId, u64)> = self
            .peers
            .iter()
            .filter(|(_, state)| state.best_height > frontier)
            .map(|(peer, state)| (*peer, state.best_height))
            .collect();
        ahead.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ahead
    }

    /// The best height any live peer reports.
    pub fn best_known_height(&self) -> Option<u64> {
        self.peers.values().map(|state| state.best_height).max()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Bounded request window beyond the local frontier:
/// `[frontier + 1, min(peer_best, frontier + max_window)]`.
pub fn request_window(frontier: u64, peer_best: u64, max_window: u64) -> Option<HeightRange> {
    if peer_best <= frontier {
        return None;
    }
    Some(HeightRange {
        from: frontier + 1,
        to: peer_best.min(frontier.saturating_add(max_window)),
    })
}
