pub mod backup;
pub mod batch;
pub mod config;
pub mod error;
pub mod mem;

pub use batch::{insert_batch, BatchError, BatchOutcome};
pub use error::ChainError;
pub use mem::MemChain;

use containers::{Block, ChainId, Committee, Hash32};

/// Contract of one authoritative chain (the beacon chain or one shard
/// chain).
///
/// Implementations synchronize themselves internally: all methods take
/// `&self` and each insertion is individually atomic. Concurrent batched
/// insertions are only ever issued against distinct chains, so no further
/// coordination is required at this layer.
pub trait Chain: Send + Sync {
    fn id(&self) -> ChainId;

    fn best_height(&self) -> u64;

    fn best_hash(&self) -> Hash32;

    fn final_height(&self) -> u64;

    fn final_hash(&self) -> Hash32;

    /// Hashes of every view currently tracked for this chain.
    fn all_view_hashes(&self) -> Vec<Hash32>;

    /// Height of the latest committed block.
    fn current_height(&self) -> u64;

    /// Insert one block. `full_validation` forces the complete per-block
    /// checks even when the caller has already batch-validated signatures.
    fn insert_block(&self, block: &Block, full_validation: bool) -> Result<(), ChainError>;

    fn has_block(&self, block: &Block) -> bool;

    fn validate_block_signatures(
        &self,
        block: &Block,
        committee: &Committee,
    ) -> Result<(), ChainError>;

    /// The committee snapshot governing blocks at `height`.
    fn committee_at(&self, height: u64) -> Result<Committee, ChainError>;

    /// Committed block at `height`, for height-ordered iteration.
    fn block_by_height(&self, height: u64) -> Option<Block>;

    fn set_ready(&self, ready: bool);

    fn is_ready(&self) -> bool;
}
