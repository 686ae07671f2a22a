use crate::{ChainId, Hash32};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Best-view pointer for one chain, as reported in a peer heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Hash32,
}

/// Periodic peer state broadcast: the sender's best view for every chain it
/// follows. The sender identity is attributed by the transport layer, not
/// carried in the payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp_ms: u64,
    pub tips: BTreeMap<ChainId, ChainTip>,
}

impl Heartbeat {
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            tips: BTreeMap::new(),
        }
    }

    pub fn with_tip(mut self, chain: ChainId, height: u64, hash: Hash32) -> Self {
        self.tips.insert(chain, ChainTip { height, hash });
        self
    }

    pub fn tip(&self, chain: ChainId) -> Option<&ChainTip> {
        self.tips.get(&chain)
    }
}
