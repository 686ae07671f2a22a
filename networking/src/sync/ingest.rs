use crate::sync::block_pool::BlockPoolHandle;
use chain::{insert_batch, Chain};
use containers::Block;
use fork_choice::{MultiViewHandle, View};
use tracing::warn;

/// Split `blocks` into the contiguous run starting right above `frontier`
/// and the out-of-order rest. Blocks at or below the frontier are dropped;
/// they are already committed or can never be.
pub(crate) fn contiguous_run(frontier: u64, blocks: &[Block]) -> (Vec<Block>, Vec<Block>) {
    let mut run = Vec::new();
    let mut rest = Vec::new();
    for block in blocks {
        if block.height() <= frontier {
            continue;
        }
        let expected = frontier + 1 + run.len() as u64;
        if block.height() == expected {
            run.push(block.clone());
        } else {
            rest.push(block.clone());
        }
    }
    (run, rest)
}

/// Commit a contiguous run through the batched insertion path, mirror the
/// accepted views into fork choice, and stage whatever the batch did not
/// cover back into the pool for the next pass. Returns the newly inserted
/// count.
pub(crate) async fn commit_run(
    chain: &dyn Chain,
    multiview: &MultiViewHandle,
    pool: &BlockPoolHandle,
    run: Vec<Block>,
) -> usize {
    if run.is_empty() {
        return 0;
    }
    match insert_batch(chain, &run) {
        Ok(outcome) => {
            let covered = outcome.last_height.unwrap_or(0);
            for block in &run {
                if block.height() <= covered {
                    if let Err(err) = multiview.add_view(View::from(block)).await {
                        warn!(chain = %chain.id(), %err, "Fork-choice update failed");
                    }
                } else {
                    // Next committee epoch, or beyond a shrunk confirmed
                    // prefix; the next pass picks it up from the pool.
                    let _ = pool.add_block(block.clone()).await;
                }
            }
            outcome.inserted
        }
        Err(err) => {
            // Blocks before the failure remain committed; the failing
            // block and its suffix will be re-fetched. One bad peer or
            // range must not halt the rest of synchronization.
            warn!(chain = %chain.id(), %err, "Batch insert aborted");
            err.inserted
        }
    }
}

/// Pull the deepest pooled chain extending the committed tip and commit it.
pub(crate) async fn drain_pool(
    chain: &dyn Chain,
    multiview: &MultiViewHandle,
    pool: &BlockPoolHandle,
) -> usize {
    let Ok(chained) = pool.longest_chain(chain.best_hash()).await else {
        return 0;
    };
    if chained.is_empty() {
        return 0;
    }
    let hashes: Vec<_> = chained.iter().map(|block| block.hash()).collect();
    let (run, _rest) = contiguous_run(chain.best_height(), &chained);
    let inserted = commit_run(chain, multiview, pool, run).await;
    if inserted > 0 {
        let _ = pool.remove_blocks(hashes[..inserted].to_vec()).await;
    }
    inserted
}
