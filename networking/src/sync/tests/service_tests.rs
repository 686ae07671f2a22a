use super::common::{
    beacon_blocks, genesis_chain, init_test_logging, shard_blocks, wait_until, MockNetwork,
};
use crate::requester::ChainSelector;
use crate::sync::config::SyncConfig;
use crate::sync::service::SyncService;
use chain::Chain;
use containers::{ChainId, Hash32, Heartbeat};
use libp2p_identity::PeerId;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn test_service_syncs_beacon_and_shards() {
    init_test_logging();
    let (beacon_chain, beacon_genesis) = genesis_chain(ChainId::Beacon);
    let (shard0_chain, shard0_genesis) = genesis_chain(ChainId::Shard(0));
    let (shard1_chain, shard1_genesis) = genesis_chain(ChainId::Shard(1));

    let network = MockNetwork::new();
    network.stock(ChainSelector::Beacon, beacon_blocks(2, 20, beacon_genesis));
    // Shard blocks reference beacon height 1, final from the start.
    network.stock(
        ChainSelector::Shard(0),
        shard_blocks(0, 2, 12, shard0_genesis, 1),
    );
    network.stock(
        ChainSelector::Shard(1),
        shard_blocks(1, 2, 9, shard1_genesis, 1),
    );

    let mut shard_chains: BTreeMap<u8, Arc<dyn Chain>> = BTreeMap::new();
    shard_chains.insert(0, shard0_chain.clone());
    shard_chains.insert(1, shard1_chain.clone());

    let service = Arc::new(SyncService::new(
        beacon_chain.clone(),
        shard_chains,
        network.clone(),
        SyncConfig::fast(),
    ));
    service.start_all();

    let peer = PeerId::random();
    let pump = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            loop {
                let heartbeat = Heartbeat::new(1_000)
                    .with_tip(ChainId::Beacon, 20, Hash32::repeat(1))
                    .with_tip(ChainId::Shard(0), 12, Hash32::repeat(2))
                    .with_tip(ChainId::Shard(1), 9, Hash32::repeat(3));
                service.on_heartbeat(peer, &heartbeat);
                sleep(Duration::from_millis(50)).await;
            }
        })
    };

    let beacon_probe = beacon_chain.clone();
    assert!(wait_until(5_000, || beacon_probe.best_height() == 20).await);
    let shard_probe = shard0_chain.clone();
    assert!(wait_until(5_000, || shard_probe.best_height() == 12).await);
    let shard_probe = shard1_chain.clone();
    assert!(wait_until(5_000, || shard_probe.best_height() == 9).await);

    let service_probe = Arc::clone(&service);
    assert!(wait_until(5_000, move || {
        service_probe.is_caught_up(ChainId::Beacon) && service_probe.is_caught_up(ChainId::Shard(0))
    })
    .await);

    // Pools drained after commit.
    assert_eq!(service.pool_size(ChainId::Beacon).await.unwrap(), 0);
    assert!(service.block_list(ChainId::Shard(0)).await.unwrap().is_empty());

    pump.abort();
    service.stop_all();
    let set = service.shard_set(0).unwrap();
    assert!(wait_until(1_000, || !set.shard.is_running()).await);
    assert!(!service.beacon().is_running());
}

#[tokio::test]
async fn test_local_block_enters_chain_and_fork_choice() {
    let (beacon_chain, beacon_genesis) = genesis_chain(ChainId::Beacon);
    let service = SyncService::new(
        beacon_chain.clone(),
        BTreeMap::new(),
        MockNetwork::new(),
        SyncConfig::fast(),
    );

    let block = beacon_blocks(2, 2, beacon_genesis).remove(0);
    service.ingest_local_block(block.clone()).await.unwrap();

    assert_eq!(beacon_chain.best_height(), 2);
    let best = service
        .beacon()
        .multiview()
        .best_view()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(best.hash, block.hash());
}

#[tokio::test]
async fn test_resync_routes_to_the_right_chain() {
    let (beacon_chain, _) = genesis_chain(ChainId::Beacon);
    let network = MockNetwork::new();
    network.stock(ChainSelector::Beacon, beacon_blocks(50, 60, Hash32::ZERO));

    let service = SyncService::new(
        beacon_chain,
        BTreeMap::new(),
        network.clone(),
        SyncConfig::fast(),
    );

    // Resync needs a live peer on the beacon driver's shared peer map.
    let peer = PeerId::random();
    service.on_heartbeat(
        peer,
        &Heartbeat::new(1_000).with_tip(ChainId::Beacon, 60, Hash32::repeat(1)),
    );

    service.resync(ChainId::Beacon, 50, 60).unwrap();
    let resync = service.beacon().resync().clone();
    assert!(wait_until(3_000, move || resync.buffered_len() == 11).await);

    assert!(service.resync(ChainId::Shard(9), 1, 5).is_err());
}
