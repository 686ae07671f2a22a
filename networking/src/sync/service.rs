use crate::requester::BlockRequester;
use crate::sync::beacon::BeaconSyncProcess;
use crate::sync::config::SyncConfig;
use crate::sync::cross_shard::CrossShardSyncProcess;
use crate::sync::s2b::ShardToBeaconSyncProcess;
use crate::sync::shard::ShardSyncProcess;
use crate::sync::SyncError;
use anyhow::{anyhow, Result};
use chain::Chain;
use containers::{Block, ChainId, Heartbeat};
use libp2p_identity::PeerId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// The drivers attached to one shard.
pub struct ShardSet {
    pub shard: Arc<ShardSyncProcess>,
    pub cross: Arc<CrossShardSyncProcess>,
    pub s2b: Arc<ShardToBeaconSyncProcess>,
}

/// Owns the per-chain sync drivers, routes transport-attributed heartbeats,
/// and exposes the external control points: start/stop per chain (driven by
/// committee membership), catch-up queries, pool diagnostics, and bulk
/// resynchronization requests.
pub struct SyncService {
    beacon: Arc<BeaconSyncProcess>,
    shards: BTreeMap<u8, ShardSet>,
}

impl SyncService {
    pub fn new(
        beacon_chain: Arc<dyn Chain>,
        shard_chains: BTreeMap<u8, Arc<dyn Chain>>,
        network: Arc<dyn BlockRequester>,
        config: SyncConfig,
    ) -> Self {
        let beacon = BeaconSyncProcess::new(
            Arc::clone(&beacon_chain),
            Arc::clone(&network),
            config.clone(),
        );

        let shard_ids: Vec<u8> = shard_chains.keys().copied().collect();
        let mut shards = BTreeMap::new();
        for (&shard_id, shard_chain) in &shard_chains {
            let shard = ShardSyncProcess::new(
                shard_id,
                Arc::clone(shard_chain),
                Arc::clone(&beacon_chain),
                Arc::clone(&network),
                config.clone(),
            );
            let sources: Vec<u8> = shard_ids
                .iter()
                .copied()
                .filter(|&source| source != shard_id)
                .collect();
            let cross = CrossShardSyncProcess::new(
                shard_id,
                sources,
                shard.caught_up_flag(),
                Arc::clone(&network),
                config.clone(),
            );
            let s2b = ShardToBeaconSyncProcess::new(
                shard_id,
                shard.caught_up_flag(),
                Arc::clone(&network),
                config.clone(),
            );
            shards.insert(shard_id, ShardSet { shard, cross, s2b });
        }

        info!(shards = shards.len(), "Sync service constructed");
        Self { beacon, shards }
    }

    pub fn beacon(&self) -> &Arc<BeaconSyncProcess> {
        &self.beacon
    }

    pub fn shard_set(&self, shard: u8) -> Option<&ShardSet> {
        self.shards.get(&shard)
    }

    pub fn start_beacon(&self) {
        Arc::clone(&self.beacon).start();
    }

    pub fn stop_beacon(&self) {
        self.beacon.stop();
    }

    /// Start the full driver set for one shard.
    pub fn start_shard(&self, shard: u8) {
        if let Some(set) = self.shards.get(&shard) {
            Arc::clone(&set.shard).start();
            Arc::clone(&set.cross).start();
            Arc::clone(&set.s2b).start();
        }
    }

    pub fn stop_shard(&self, shard: u8) {
        if let Some(set) = self.shards.get(&shard) {
            set.shard.stop();
            set.cross.stop();
            set.s2b.stop();
        }
    }

    pub fn start_all(&self) {
        self.start_beacon();
        for &shard in self.shards.keys() {
            self.start_shard(shard);
        }
    }

    pub fn stop_all(&self) {
        self.stop_beacon();
        for &shard in self.shards.keys() {
            self.stop_shard(shard);
        }
    }

    /// Fan one peer heartbeat out to every driver; each keeps only the tips
    /// for its own chain.
    pub fn on_heartbeat(&self, peer: PeerId, heartbeat: &Heartbeat) {
        self.beacon.on_heartbeat(peer, heartbeat);
        for set in self.shards.values() {
            set.shard.on_heartbeat(peer, heartbeat);
            set.cross.on_heartbeat(peer, heartbeat);
            set.s2b.on_heartbeat(peer, heartbeat);
        }
    }

    pub fn is_caught_up(&self, chain: ChainId) -> bool {
        match chain {
            ChainId::Beacon => self.beacon.is_caught_up(),
            ChainId::Shard(shard) => self
                .shards
                .get(&shard)
                .map(|set| set.shard.is_caught_up())
                .unwrap_or(false),
        }
    }

    /// Request bulk historical resynchronization of `[from, to]`.
    pub fn resync(&self, chain: ChainId, from: u64, to: u64) -> Result<()> {
        match chain {
            ChainId::Beacon => {
                self.beacon.resync().request_range(from, to);
                Ok(())
            }
            ChainId::Shard(shard) => {
                let set = self
                    .shards
                    .get(&shard)
                    .ok_or_else(|| anyhow!("unknown shard {shard}"))?;
                set.shard.resync().request_range(from, to);
                Ok(())
            }
        }
    }

    /// Route a locally produced block into its chain and fork-choice
    /// tracker, the same way a fetched block would be admitted.
    pub async fn ingest_local_block(&self, block: Block) -> Result<(), SyncError> {
        match block.chain() {
            ChainId::Beacon => self.beacon.ingest_local_block(block).await,
            ChainId::Shard(shard) => match self.shards.get(&shard) {
                Some(set) => set.shard.ingest_local_block(block).await,
                None => Err(SyncError::Request(anyhow!("unknown shard {shard}"))),
            },
        }
    }

    /// Diagnostics: staged block count for one chain's pool.
    pub async fn pool_size(&self, chain: ChainId) -> Result<usize> {
        match chain {
            ChainId::Beacon => self.beacon.pool().pool_size().await,
            ChainId::Shard(shard) => {
                let set = self
                    .shards
                    .get(&shard)
                    .ok_or_else(|| anyhow!("unknown shard {shard}"))?;
                set.shard.pool().pool_size().await
            }
        }
    }

    /// Diagnostics: the staged blocks of one chain's pool, ascending by
    /// height.
    pub async fn block_list(&self, chain: ChainId) -> Result<Vec<Block>> {
        match chain {
            ChainId::Beacon => self.beacon.pool().block_list().await,
            ChainId::Shard(shard) => {
                let set = self
                    .shards
                    .get(&shard)
                    .ok_or_else(|| anyhow!("unknown shard {shard}"))?;
                set.shard.pool().block_list().await
            }
        }
    }
}
