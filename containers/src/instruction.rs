use crate::ValidatorKey;
use serde::{Deserialize, Serialize};

/// Committee-affecting instructions carried in block bodies.
///
/// Only the instructions the synchronization layer cares about are modeled:
/// a swap rotates validators in and out of the signing committee, which ends
/// the committee epoch for every block that follows it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Swap {
        in_keys: Vec<ValidatorKey>,
        out_keys: Vec<ValidatorKey>,
    },
    Stake {
        key: ValidatorKey,
    },
    Unstake {
        key: ValidatorKey,
    },
}

impl Instruction {
    /// Whether applying this instruction changes the signing committee for
    /// subsequent blocks.
    pub fn changes_committee(&self) -> bool {
        matches!(self, Instruction::Swap { .. })
    }
}
