/// Synchronization layer for the sharded node.
///
/// Keeps every local chain caught up with its peers:
///
/// - **Peer Manager**: per-chain peer heartbeat bookkeeping and request
///   window selection
/// - **Range Tracker**: balanced interval set answering which height ranges
///   still need fetching
/// - **Block Pool / Cross Pool**: staging areas assembling out-of-order
///   blocks into contiguous runs
/// - **Resync Manager**: bulk historical catch-up with request
///   deduplication and TTL-bounded buffering
/// - **Sync drivers**: one per chain kind (beacon, shard, cross-shard,
///   shard-to-beacon), consuming heartbeats and issuing streaming fetches
/// - **Sync Service**: constructs and controls the drivers and routes
///   heartbeats
///
/// ## Control flow
///
/// Peers broadcast heartbeats with their best height per chain. Each driver
/// periodically computes the missing window beyond the local frontier,
/// issues a bounded streaming fetch, and promotes contiguous runs into the
/// authoritative chain through the batched insertion path. Accepted blocks
/// are mirrored into the chain's fork-choice tracker.
pub mod block_pool;
pub mod config;
pub mod cross_pool;
pub mod beacon;
pub mod cross_shard;
pub mod peer_manager;
pub mod range_tracker;
pub mod resync;
pub mod s2b;
pub mod service;
pub mod shard;
pub mod states;

mod ingest;

pub use beacon::BeaconSyncProcess;
pub use block_pool::{BlockPool, BlockPoolHandle};
pub use config::SyncConfig;
pub use cross_pool::{CrossBlockPool, CrossPoolHandle};
pub use cross_shard::CrossShardSyncProcess;
pub use peer_manager::{PeerManager, PeerState};
pub use range_tracker::{HeightRange, RangeTracker};
pub use resync::{ResyncHandle, ResyncManager, ResyncRequest};
pub use s2b::ShardToBeaconSyncProcess;
pub use service::SyncService;
pub use shard::ShardSyncProcess;
pub use states::ProcessStatus;

use thiserror::Error;

/// Failures surfaced by the synchronization layer. Transient conditions are
/// retried or narrowed locally; only structural failures reach the caller.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no live peer can serve heights [{from}, {to}]")]
    NoPeer { from: u64, to: u64 },

    #[error("missing heights [{from}, {to}] after {attempts} attempts")]
    MissingRange { from: u64, to: u64, attempts: u32 },

    #[error("request failed: {0}")]
    Request(#[source] anyhow::Error),

    #[error(transparent)]
    Chain(#[from] chain::ChainError),
}

#[cfg(test)]
mod tests;
