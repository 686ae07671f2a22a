use crate::view::View;
use containers::Hash32;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// How many ancestor steps below the best view a view must be buried before
/// it is considered final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfirmRule {
    /// One step: the best view's parent is final.
    #[default]
    SingleStep,
    /// Two steps: the stricter two-round confirmation rule.
    DoubleStep,
}

impl ConfirmRule {
    pub fn steps(&self) -> usize {
        match self {
            ConfirmRule::SingleStep => 1,
            ConfirmRule::DoubleStep => 2,
        }
    }
}

/// Fork-choice tracker over the DAG of views received for one chain.
///
/// Tracks every view whose parent is known, and maintains the best view
/// (greatest height, ties toward the earlier block time) and the final view
/// (the ancestor buried `ConfirmRule::steps()` below the best view). The
/// final view's height never decreases outside [`MultiView::clear_branch`].
#[derive(Clone, Debug, Default)]
pub struct MultiView {
    views: HashMap<Hash32, View>,
    best: Option<Hash32>,
    finalized: Option<Hash32>,
    rule: ConfirmRule,
}

impl MultiView {
    pub fn new(rule: ConfirmRule) -> Self {
        Self {
            views: HashMap::new(),
            best: None,
            finalized: None,
            rule,
        }
    }

    /// Add a view to the tracker.
    ///
    /// The first view is accepted unconditionally as the anchor and pins
    /// both best and final. Afterwards a view is accepted only if its parent
    /// is tracked; re-adding a known hash is a no-op. Returns whether the
    /// view was newly accepted.
    pub fn add_view(&mut self, view: View) -> bool {
        if self.views.contains_key(&view.hash) {
            return false;
        }

        if self.views.is_empty() {
            let hash = view.hash;
            self.views.insert(hash, view);
            self.best = Some(hash);
            self.finalized = Some(hash);
            return true;
        }

        if !self.views.contains_key(&view.prev_hash) {
            debug!(
                hash = ?view.hash,
                parent = ?view.prev_hash,
                height = view.height,
                "Rejected view with unknown parent"
            );
            return false;
        }

        self.views.insert(view.hash, view);
        self.recompute_best();
        self.recompute_finalized();
        true
    }

    pub fn best_view(&self) -> Option<&View> {
        self.best.and_then(|hash| self.views.get(&hash))
    }

    pub fn final_view(&self) -> Option<&View> {
        self.finalized.and_then(|hash| self.views.get(&hash))
    }

    pub fn get(&self, hash: &Hash32) -> Option<&View> {
        self.views.get(hash)
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.views.contains_key(hash)
    }

    pub fn view_hashes(&self) -> Vec<Hash32> {
        self.views.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Pin the final view to `hash`, on the strength of an external majority
    /// confirmation. Honored only if the hash is tracked and lies on the
    /// best view's ancestry (the best view itself counts).
    pub fn finalize_view(&mut self, hash: Hash32) -> bool {
        if !self.views.contains_key(&hash) {
            return false;
        }
        if !self.on_best_ancestry(hash) {
            return false;
        }
        self.finalized = Some(hash);
        true
    }

    /// Drop every view that does not descend from the current final view.
    /// Used to recover from an abandoned long-run fork.
    pub fn clear_branch(&mut self) {
        let Some(final_hash) = self.finalized else {
            return;
        };

        let mut children: HashMap<Hash32, Vec<Hash32>> = HashMap::new();
        for view in self.views.values() {
            children.entry(view.prev_hash).or_default().push(view.hash);
        }

        let mut keep: HashSet<Hash32> = HashSet::new();
        let mut stack = vec![final_hash];
        while let Some(hash) = stack.pop() {
            if keep.insert(hash) {
                if let Some(descendants) = children.get(&hash) {
                    stack.extend(descendants.iter().copied());
                }
            }
        }

        let before = self.views.len();
        self.views.retain(|hash, _| keep.contains(hash));
        debug!(
            dropped = before - self.views.len(),
            kept = self.views.len(),
            "Cleared non-final branches"
        );

        self.recompute_best();
        self.recompute_finalized();
    }

    fn recompute_best(&mut self) {
        self.best = self
            .views
            .values()
            .max_by(|a, b| {
                a.height
                    .cmp(&b.height)
                    .then(b.block_time_ms.cmp(&a.block_time_ms))
                    .then(a.hash.cmp(&b.hash))
            })
            .map(|view| view.hash);
    }

    /// Walk back from the best view the configured number of steps. If an
    /// ancestor is missing the final view is left unchanged; the final
    /// height only ever moves forward.
    fn recompute_finalized(&mut self) {
        let Some(best) = self.best else {
            return;
        };

        let mut cursor = best;
        for _ in 0..self.rule.steps() {
            let Some(view) = self.views.get(&cursor) else {
                return;
            };
            if !self.views.contains_key(&view.prev_hash) {
                return;
            }
            cursor = view.prev_hash;
        }

        let candidate_height = self.views[&cursor].height;
        let current_height = self
            .finalized
            .and_then(|hash| self.views.get(&hash))
            .map(|view| view.height);
        if current_height.map_or(true, |height| candidate_height >= height) {
            self.finalized = Some(cursor);
        }
    }

    fn on_best_ancestry(&self, hash: Hash32) -> bool {
        let Some(mut cursor) = self.best else {
            return false;
        };
        let target_height = self.views[&hash].height;
        loop {
            if cursor == hash {
                return true;
            }
            let Some(view) = self.views.get(&cursor) else {
                return false;
            };
            if view.height <= target_height {
                return false;
            }
            cursor = view.prev_hash;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use containers::ChainId;

    fn view(hash: u8, prev: u8, height: u64, time: u64) -> View {
        View {
            hash: Hash32::repeat(hash),
            prev_hash: Hash32::repeat(prev),
            height,
            block_time_ms: time,
            committee_root: Hash32::repeat(0xcc),
            chain: ChainId::Beacon,
        }
    }

    /// Heights 1..=4 chained as 0x01 -> 0x02 -> 0x03 -> 0x04.
    fn chain_of_four() -> MultiView {
        let mut multiview = MultiView::new(ConfirmRule::SingleStep);
        assert!(multiview.add_view(view(1, 0, 1, 1_000)));
        assert!(multiview.add_view(view(2, 1, 2, 2_000)));
        assert!(multiview.add_view(view(3, 2, 3, 3_000)));
        assert!(multiview.add_view(view(4, 3, 4, 4_000)));
        multiview
    }

    #[test]
    fn test_bootstrap_pins_best_and_final() {
        let mut multiview = MultiView::default();
        assert!(multiview.add_view(view(1, 0, 1, 1_000)));
        assert_eq!(multiview.best_view().unwrap().hash, Hash32::repeat(1));
        assert_eq!(multiview.final_view().unwrap().hash, Hash32::repeat(1));
    }

    #[test]
    fn test_best_follows_height_and_final_trails() {
        let multiview = chain_of_four();
        assert_eq!(multiview.best_view().unwrap().height, 4);
        assert_eq!(multiview.final_view().unwrap().height, 3);
    }

    #[test]
    fn test_fork_at_same_height_breaks_tie_by_earlier_time() {
        let mut multiview = chain_of_four();
        // Second height-4 view forking off height 3 with an earlier time.
        assert!(multiview.add_view(view(5, 3, 4, 3_500)));

        let best = multiview.best_view().unwrap();
        assert_eq!(best.height, 4);
        assert_eq!(best.hash, Hash32::repeat(5));
        // One-step confirmation: best's parent, the height-3 view.
        let finalized = multiview.final_view().unwrap();
        assert_eq!(finalized.height, 3);
        assert_eq!(finalized.hash, Hash32::repeat(3));
    }

    #[test]
    fn test_two_step_rule_trails_one_deeper() {
        let mut multiview = MultiView::new(ConfirmRule::DoubleStep);
        multiview.add_view(view(1, 0, 1, 1_000));
        multiview.add_view(view(2, 1, 2, 2_000));
        multiview.add_view(view(3, 2, 3, 3_000));
        multiview.add_view(view(4, 3, 4, 4_000));
        assert_eq!(multiview.final_view().unwrap().height, 2);
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut multiview = chain_of_four();
        let best_before = multiview.best_view().unwrap().clone();
        let final_before = multiview.final_view().unwrap().clone();

        assert!(!multiview.add_view(view(4, 3, 4, 4_000)));
        assert_eq!(multiview.best_view().unwrap(), &best_before);
        assert_eq!(multiview.final_view().unwrap(), &final_before);
        assert_eq!(multiview.len(), 4);
    }

    #[test]
    fn test_orphan_is_rejected() {
        let mut multiview = chain_of_four();
        assert!(!multiview.add_view(view(9, 8, 9, 9_000)));
        assert_eq!(multiview.best_view().unwrap().height, 4);
        assert_eq!(multiview.len(), 4);
    }

    #[test]
    fn test_best_height_is_monotonic() {
        let mut multiview = MultiView::default();
        let mut highest = 0;
        multiview.add_view(view(1, 0, 1, 1_000));
        for (hash, prev, height, time) in
            [(2u8, 1u8, 2u64, 2_000u64), (3, 2, 3, 3_000), (5, 2, 3, 2_500), (4, 3, 4, 4_000)]
        {
            multiview.add_view(view(hash, prev, height, time));
            let best = multiview.best_view().unwrap().height;
            assert!(best >= highest);
            highest = best;
        }
        assert_eq!(highest, 4);
    }

    #[test]
    fn test_finalize_view_pins_ancestor_only() {
        let mut multiview = chain_of_four();
        // Height 2 is an ancestor of the best view.
        assert!(multiview.finalize_view(Hash32::repeat(2)));
        assert_eq!(multiview.final_view().unwrap().height, 2);

        // Unknown hash is refused.
        assert!(!multiview.finalize_view(Hash32::repeat(0x77)));

        // A fork sibling is not on the best ancestry.
        multiview.add_view(view(6, 2, 3, 9_000));
        assert!(!multiview.finalize_view(Hash32::repeat(6)));
    }

    #[test]
    fn test_clear_branch_drops_abandoned_fork() {
        let mut multiview = chain_of_four();
        // Fork off height 2; final view is the height-3 view, so the fork
        // does not descend from it.
        multiview.add_view(view(6, 2, 3, 9_000));
        assert_eq!(multiview.len(), 5);

        multiview.clear_branch();
        assert!(!multiview.contains(&Hash32::repeat(6)));
        // Views below the final view are dropped too.
        assert!(!multiview.contains(&Hash32::repeat(1)));
        assert_eq!(multiview.best_view().unwrap().height, 4);
        assert_eq!(multiview.final_view().unwrap().height, 3);
    }

    #[test]
    fn test_clone_is_independent() {
        let multiview = chain_of_four();
        let mut speculative = multiview.clone();
        assert!(speculative.add_view(view(5, 4, 5, 5_000)));

        assert_eq!(speculative.best_view().unwrap().height, 5);
        assert_eq!(multiview.best_view().unwrap().height, 4);
        assert_eq!(multiview.len(), 4);
    }
}
