pub mod block;
pub mod committee;
pub mod heartbeat;
pub mod instruction;
pub mod types;

pub use block::{
    BeaconBlock, Block, BlockHeader, CrossOutput, CrossShardBlock, ShardBlock, ShardStateDigest,
    ShardToBeaconBlock,
};
pub use committee::{Committee, ValidatorKey};
pub use heartbeat::{ChainTip, Heartbeat};
pub use instruction::Instruction;
pub use types::{ChainId, Hash32};
