use containers::Hash32;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {hash} at height {height} failed signature validation")]
    InvalidSignature { hash: Hash32, height: u64 },

    #[error("failed to insert block {hash} at height {height}: {reason}")]
    Insert {
        hash: Hash32,
        height: u64,
        reason: String,
    },

    #[error("no committee known for height {height}")]
    CommitteeUnavailable { height: u64 },

    #[error("block {hash} at height {height} references unknown parent {parent}")]
    UnknownParent {
        hash: Hash32,
        height: u64,
        parent: Hash32,
    },

    #[error("chain is not ready")]
    NotReady,
}
