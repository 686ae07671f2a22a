use crate::{Chain, ChainError};
use containers::{Block, Hash32};
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of one batched insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Blocks newly inserted; already-present blocks are skipped and not
    /// counted.
    pub inserted: usize,
    /// Height of the last block the batch covered. The caller resumes from
    /// the next height; anything beyond it belongs to a later batch.
    pub last_height: Option<u64>,
}

/// Insertion failed partway through a batch. Earlier insertions remain
/// committed; each block's persistence is individually atomic.
#[derive(Debug, Error)]
#[error("inserting block {hash} at height {height} (after {inserted} inserted): {source}")]
pub struct BatchError {
    pub hash: Hash32,
    pub height: u64,
    pub inserted: usize,
    #[source]
    pub source: ChainError,
}

/// Insert a height-contiguous run of fetched blocks under one validated
/// committee snapshot, with the minimum amount of per-block signature
/// verification.
///
/// The candidate batch ends at the first committee-reference change and at
/// the first height discontinuity. Validity is probed from the last block
/// backward: a later block validating against the resolved committee implies
/// the committee was correctly resolved for everything before it, so the
/// confirmed prefix skips redundant per-block checks. When nothing probes
/// valid (the resolved committee may be stale relative to the true frontier)
/// every block is inserted individually with full checks instead. The first
/// insertion of a batch is always fully validated.
pub fn insert_batch(chain: &dyn Chain, blocks: &[Block]) -> Result<BatchOutcome, BatchError> {
    if blocks.is_empty() {
        return Ok(BatchOutcome {
            inserted: 0,
            last_height: None,
        });
    }

    let mut end = 1;
    while end < blocks.len() {
        let prev = &blocks[end - 1];
        let next = &blocks[end];
        if next.height() != prev.height() + 1 {
            debug!(
                chain = %chain.id(),
                at = next.height(),
                expected = prev.height() + 1,
                "Batch truncated at height gap"
            );
            break;
        }
        if next.committee_root() != prev.committee_root() || prev.changes_committee() {
            debug!(
                chain = %chain.id(),
                at = next.height(),
                "Batch truncated at committee change"
            );
            break;
        }
        end += 1;
    }
    let batch = &blocks[..end];

    let committee = match chain.committee_at(batch[0].height()) {
        Ok(committee) => Some(committee),
        Err(err) => {
            warn!(
                chain = %chain.id(),
                height = batch[0].height(),
                %err,
                "Committee resolution failed, falling back to full validation"
            );
            None
        }
    };

    // Probe from the back: the deepest block that validates bounds the
    // confirmed prefix.
    let mut confirmed = 0;
    if let Some(committee) = &committee {
        for index in (0..batch.len()).rev() {
            if chain
                .validate_block_signatures(&batch[index], committee)
                .is_ok()
            {
                confirmed = index + 1;
                break;
            }
        }
    }

    let mut inserted = 0;
    if confirmed == 0 {
        for block in batch {
            if chain.has_block(block) {
                continue;
            }
            insert_one(chain, block, true, &mut inserted)?;
        }
    } else {
        let mut first = true;
        for block in &batch[..confirmed] {
            if chain.has_block(block) {
                continue;
            }
            insert_one(chain, block, first, &mut inserted)?;
            first = false;
        }
    }

    let last = if confirmed > 0 {
        batch[confirmed - 1].height()
    } else {
        batch[batch.len() - 1].height()
    };
    Ok(BatchOutcome {
        inserted,
        last_height: Some(last),
    })
}

fn insert_one(
    chain: &dyn Chain,
    block: &Block,
    full_validation: bool,
    inserted: &mut usize,
) -> Result<(), BatchError> {
    match chain.insert_block(block, full_validation) {
        Ok(()) => {
            *inserted += 1;
            Ok(())
        }
        Err(source) => Err(BatchError {
            hash: block.hash(),
            height: block.height(),
            inserted: *inserted,
            source,
        }),
    }
}
