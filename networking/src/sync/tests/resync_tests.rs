use super::common::{beacon_blocks, wait_until, MockNetwork};
use crate::requester::ChainSelector;
use crate::sync::config::SyncConfig;
use crate::sync::peer_manager::PeerManager;
use crate::sync::resync::ResyncManager;
use containers::{ChainId, Hash32};
use libp2p_identity::PeerId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn peer_manager_with(peer: PeerId, best: u64) -> Arc<Mutex<PeerManager>> {
    let mut manager = PeerManager::new(ChainId::Beacon);
    manager.record_tip(peer, best, Hash32::repeat(0xaa));
    Arc::new(Mutex::new(manager))
}

#[tokio::test]
async fn test_partial_delivery_re_requests_exact_suffix() {
    let network = MockNetwork::new();
    network.stock(ChainSelector::Beacon, beacon_blocks(100, 200, Hash32::ZERO));
    // First response stops after height 150 without the end sentinel.
    network.truncate_next_response_at(ChainSelector::Beacon, 150);

    let peers = peer_manager_with(PeerId::random(), 200);
    let handle = ResyncManager::spawn(
        ChainSelector::Beacon,
        peers,
        network.clone(),
        SyncConfig::fast(),
    );

    handle.request_range(100, 200);
    assert!(wait_until(2_000, || handle.buffered_len() == 101).await);

    let requests = network.range_requests();
    assert_eq!(
        requests,
        vec![
            (ChainSelector::Beacon, 100, 200),
            (ChainSelector::Beacon, 151, 200),
        ]
    );

    let drained = handle.take_from(100);
    assert_eq!(drained.len(), 101);
    assert_eq!(drained.first().unwrap().height(), 100);
    assert_eq!(drained.last().unwrap().height(), 200);
}

#[tokio::test]
async fn test_covered_ranges_deduplicate_requests() {
    let network = MockNetwork::new();
    let handle = ResyncManager::spawn(
        ChainSelector::Beacon,
        peer_manager_with(PeerId::random(), 100),
        network.clone(),
        SyncConfig::fast(),
    );

    handle.pre_sync(beacon_blocks(10, 20, Hash32::ZERO));
    assert!(wait_until(2_000, || handle.buffered_len() == 11).await);

    let gaps = handle.gaps(5, 25).await.unwrap();
    let gaps: Vec<(u64, u64)> = gaps.into_iter().map(|g| (g.from, g.to)).collect();
    assert_eq!(gaps, vec![(5, 9), (21, 25)]);

    // A range request over the covered middle only fetches the edges.
    network.stock(ChainSelector::Beacon, beacon_blocks(5, 25, Hash32::ZERO));
    handle.request_range(5, 25);
    assert!(wait_until(2_000, || handle.buffered_len() == 21).await);
    assert_eq!(
        network.range_requests(),
        vec![
            (ChainSelector::Beacon, 5, 9),
            (ChainSelector::Beacon, 21, 25),
        ]
    );
}

#[tokio::test]
async fn test_ttl_expiry_releases_data_and_coverage() {
    let network = MockNetwork::new();
    let config = SyncConfig {
        resync_ttl: Duration::from_millis(100),
        ..SyncConfig::fast()
    };
    let handle = ResyncManager::spawn(
        ChainSelector::Beacon,
        peer_manager_with(PeerId::random(), 100),
        network.clone(),
        config,
    );

    handle.pre_sync(beacon_blocks(10, 12, Hash32::ZERO));
    assert!(wait_until(2_000, || handle.buffered_len() == 3).await);
    assert_eq!(handle.gaps(10, 12).await.unwrap(), vec![]);

    // After the TTL the buffered blocks are gone and the range is
    // eligible for re-fetch.
    assert!(wait_until(2_000, || handle.buffered_len() == 0).await);
    let gaps = handle.gaps(10, 12).await.unwrap();
    assert_eq!(gaps.len(), 1);
    assert_eq!((gaps[0].from, gaps[0].to), (10, 12));
}

#[tokio::test]
async fn test_not_ready_network_requeues_request() {
    let network = MockNetwork::new();
    network.set_ready(false);
    network.stock(ChainSelector::Beacon, beacon_blocks(1, 5, Hash32::ZERO));

    let handle = ResyncManager::spawn(
        ChainSelector::Beacon,
        peer_manager_with(PeerId::random(), 5),
        network.clone(),
        SyncConfig::fast(),
    );

    handle.request_range(1, 5);
    sleep(Duration::from_millis(60)).await;
    assert_eq!(network.range_requests().len(), 0);

    network.set_ready(true);
    assert!(wait_until(2_000, || handle.buffered_len() == 5).await);
    assert_eq!(network.range_requests(), vec![(ChainSelector::Beacon, 1, 5)]);
}

#[tokio::test]
async fn test_single_height_catch_up() {
    let network = MockNetwork::new();
    network.stock(ChainSelector::Beacon, beacon_blocks(40, 45, Hash32::ZERO));

    let handle = ResyncManager::spawn(
        ChainSelector::Beacon,
        peer_manager_with(PeerId::random(), 45),
        network.clone(),
        SyncConfig::fast(),
    );

    handle.catch_up(42);
    assert!(wait_until(2_000, || handle.buffered_len() == 1).await);
    assert_eq!(network.range_requests(), vec![(ChainSelector::Beacon, 42, 42)]);
    let drained = handle.take_from(42);
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].height(), 42);
}
