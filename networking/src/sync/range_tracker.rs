use std::fmt;

/// Inclusive range of block heights.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HeightRange {
    pub from: u64,
    pub to: u64,
}

impl HeightRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    pub fn contains(&self, height: u64) -> bool {
        self.from <= height && height <= self.to
    }
}

impl fmt::Debug for HeightRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

impl fmt::Display for HeightRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

#[derive(Clone, Debug)]
struct Node {
    low: u64,
    high: u64,
    left: Option<usize>,
    right: Option<usize>,
    /// Subtree height, for rotation decisions.
    height: u32,
}

/// Self-balancing interval set over block heights.
///
/// Each node covers one inclusive range of heights that are already
/// synchronized or otherwise accounted for. Ranges are pairwise disjoint;
/// touching neighbors are absorbed as long as the merged range stays within
/// `max_span`, which bounds node width to one epoch's worth of blocks and
/// keeps the tree small under continuous eviction.
///
/// Nodes live in an arena and reference children by index; rotations only
/// move indices.
#[derive(Clone, Debug)]
pub struct RangeTracker {
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: Option<usize>,
    max_span: u64,
}

impl RangeTracker {
    pub fn new(max_span: u64) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            max_span: max_span.max(1),
        }
    }

    /// Mark `[low, high]` as covered, merging into touching neighbors where
    /// the span limit allows and splitting across existing nodes otherwise.
    pub fn insert_range(&mut self, low: u64, high: u64) {
        if low > high {
            return;
        }
        self.root = Some(self.insert_at(self.root, low, high));
    }

    /// The sub-ranges of `[from, to]` not covered by any node, ascending
    /// and disjoint.
    pub fn missing_subranges(&self, from: u64, to: u64) -> Vec<HeightRange> {
        let mut gaps = Vec::new();
        if from <= to {
            self.missing_at(self.root, from, to, &mut gaps);
        }
        gaps
    }

    /// Whether `[from, to]` is fully covered.
    pub fn covers(&self, from: u64, to: u64) -> bool {
        self.missing_subranges(from, to).is_empty()
    }

    /// The covered range containing `height`, if any.
    pub fn find(&self, height: u64) -> Option<HeightRange> {
        let mut cursor = self.root;
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            if height < node.low {
                cursor = node.left;
            } else if height > node.high {
                cursor = node.right;
            } else {
                return Some(HeightRange::new(node.low, node.high));
            }
        }
        None
    }

    /// Remove the node whose lower bound is exactly `low_key`.
    pub fn remove(&mut self, low_key: u64) -> bool {
        let (root, removed) = self.remove_at(self.root, low_key);
        self.root = root;
        removed
    }

    /// Withdraw coverage of `[from, to]`, splitting any node that extends
    /// beyond it. Heights outside the released range stay covered.
    pub fn release_range(&mut self, from: u64, to: u64) {
        if from > to {
            return;
        }
        while let Some(range) = self.find_intersecting(from, to) {
            self.remove(range.from);
            if range.from < from {
                self.insert_range(range.from, from - 1);
            }
            if range.to > to {
                self.insert_range(to + 1, range.to);
            }
        }
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    fn find_intersecting(&self, from: u64, to: u64) -> Option<HeightRange> {
        let mut cursor = self.root;
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            if to < node.low {
                cursor = node.left;
            } else if from > node.high {
                cursor = node.right;
            } else {
                return Some(HeightRange::new(node.low, node.high));
            }
        }
        None
    }

    fn insert_at(&mut self, node: Option<usize>, low: u64, high: u64) -> usize {
        let Some(idx) = node else {
            return self.alloc(low, high);
        };

        let (node_low, node_high) = {
            let node = &self.nodes[idx];
            (node.low, node.high)
        };

        let touches = high.saturating_add(1) >= node_low && low <= node_high.saturating_add(1);
        let merged_low = low.min(node_low);
        let merged_high = high.max(node_high);
        let merged_span = merged_high - merged_low + 1;

        if touches && merged_span <= self.max_span {
            self.nodes[idx].low = merged_low;
            self.nodes[idx].high = merged_high;
            self.absorb_neighbors(idx);
            return self.rebalance(idx);
        }

        // Split the incoming range at the node boundary; only the uncovered
        // pieces recurse into the children, so no overlap is ever created.
        if low < node_low {
            let piece_high = high.min(node_low - 1);
            let child = self.insert_at(self.nodes[idx].left, low, piece_high);
            self.nodes[idx].left = Some(child);
        }
        if high > node_high {
            let piece_low = low.max(node_high + 1);
            let child = self.insert_at(self.nodes[idx].right, piece_low, high);
            self.nodes[idx].right = Some(child);
        }
        self.rebalance(idx)
    }

    /// After widening `idx` in place, pull in descendants its range now
    /// reaches. Overlapping neighbors are always absorbed (disjointness is
    /// an invariant); adjacent ones only while the span limit allows.
    fn absorb_neighbors(&mut self, idx: usize) {
        loop {
            let Some(right_root) = self.nodes[idx].right else {
                break;
            };
            let successor = self.min_of(right_root);
            let high = self.nodes[idx].high;
            let (succ_low, succ_high) = {
                let node = &self.nodes[successor];
                (node.low, node.high)
            };
            let overlaps = succ_low <= high;
            let merged_high = high.max(succ_high);
            let span = merged_high - self.nodes[idx].low + 1;
            if overlaps || (succ_low <= high.saturating_add(1) && span <= self.max_span) {
                let (new_right, detached) = self.detach_min(right_root);
                debug_assert_eq!(detached, successor);
                self.nodes[idx].right = new_right;
                self.nodes[idx].high = merged_high;
                self.release_node(detached);
            } else {
                break;
            }
        }

        loop {
            let Some(left_root) = self.nodes[idx].left else {
                break;
            };
            let predecessor = self.max_of(left_root);
            let low = self.nodes[idx].low;
            let (pred_low, pred_high) = {
                let node = &self.nodes[predecessor];
                (node.low, node.high)
            };
            let overlaps = pred_high >= low;
            let merged_low = low.min(pred_low);
            let span = self.nodes[idx].high - merged_low + 1;
            if overlaps || (pred_high.saturating_add(1) >= low && span <= self.max_span) {
                let (new_left, detached) = self.detach_max(left_root);
                debug_assert_eq!(detached, predecessor);
                self.nodes[idx].left = new_left;
                self.nodes[idx].low = merged_low;
                self.release_node(detached);
            } else {
                break;
            }
        }
    }

    fn missing_at(&self, node: Option<usize>, from: u64, to: u64, gaps: &mut Vec<HeightRange>) {
        let Some(idx) = node else {
            gaps.push(HeightRange::new(from, to));
            return;
        };
        let (node_low, node_high, left, right) = {
            let node = &self.nodes[idx];
            (node.low, node.high, node.left, node.right)
        };

        if to < node_low {
            self.missing_at(left, from, to, gaps);
            return;
        }
        if from > node_high {
            self.missing_at(right, from, to, gaps);
            return;
        }
        if from < node_low {
            self.missing_at(left, from, node_low - 1, gaps);
        }
        if to > node_high {
            self.missing_at(right, node_high + 1, to, gaps);
        }
    }

    fn remove_at(&mut self, node: Option<usize>, low_key: u64) -> (Option<usize>, bool) {
        let Some(idx) = node else {
            return (None, false);
        };
        let node_low = self.nodes[idx].low;

        if low_key < node_low {
            let (new_left, removed) = self.remove_at(self.nodes[idx].left, low_key);
            self.nodes[idx].left = new_left;
            (Some(self.rebalance(idx)), removed)
        } else if low_key > node_low {
            let (new_right, removed) = self.remove_at(self.nodes[idx].right, low_key);
            self.nodes[idx].right = new_right;
            (Some(self.rebalance(idx)), removed)
        } else {
            let (left, right) = (self.nodes[idx].left, self.nodes[idx].right);
            match (left, right) {
                (None, child) | (child, None) => {
                    self.release_node(idx);
                    (child, true)
                }
                (Some(_), Some(right_root)) => {
                    // Replace with the in-order successor.
                    let (new_right, successor) = self.detach_min(right_root);
                    self.nodes[idx].low = self.nodes[successor].low;
                    self.nodes[idx].high = self.nodes[successor].high;
                    self.nodes[idx].right = new_right;
                    self.release_node(successor);
                    (Some(self.rebalance(idx)), true)
                }
            }
        }
    }

    /// Detach the minimum node of the subtree, rebalancing on the way out.
    /// Returns the new subtree root and the detached index.
    fn detach_min(&mut self, idx: usize) -> (Option<usize>, usize) {
        if let Some(left) = self.nodes[idx].left {
            let (new_left, detached) = self.detach_min(left);
            self.nodes[idx].left = new_left;
            (Some(self.rebalance(idx)), detached)
        } else {
            (self.nodes[idx].right, idx)
        }
    }

    fn detach_max(&mut self, idx: usize) -> (Option<usize>, usize) {
        if let Some(right) = self.nodes[idx].right {
            let (new_right, detached) = self.detach_max(right);
            self.nodes[idx].right = new_right;
            (Some(self.rebalance(idx)), detached)
        } else {
            (self.nodes[idx].left, idx)
        }
    }

    fn min_of(&self, mut idx: usize) -> usize {
        while let Some(left) = self.nodes[idx].left {
            idx = left;
        }
        idx
    }

    fn max_of(&self, mut idx: usize) -> usize {
        while let Some(right) = self.nodes[idx].right {
            idx = right;
        }
        idx
    }

    fn alloc(&mut self, low: u64, high: u64) -> usize {
        let node = Node {
            low,
            high,
            left: None,
            right: None,
            height: 1,
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn release_node(&mut self, idx: usize) {
        self.free.push(idx);
    }

    fn height_of(&self, node: Option<usize>) -> u32 {
        node.map(|idx| self.nodes[idx].height).unwrap_or(0)
    }

    fn update_height(&mut self, idx: usize) {
        let left = self.height_of(self.nodes[idx].left);
        let right = self.height_of(self.nodes[idx].right);
        self.nodes[idx].height = 1 + left.max(right);
    }

    fn balance_factor(&self, idx: usize) -> i64 {
        self.height_of(self.nodes[idx].left) as i64 - self.height_of(self.nodes[idx].right) as i64
    }

    fn rotate_right(&mut self, idx: usize) -> usize {
        let pivot = self.nodes[idx].left.expect("rotate_right without left child");
        self.nodes[idx].left = self.nodes[pivot].right;
        self.nodes[pivot].right = Some(idx);
        self.update_height(idx);
        self.update_height(pivot);
        pivot
    }

    fn rotate_left(&mut self, idx: usize) -> usize {
        let pivot = self.nodes[idx].right.expect("rotate_left without right child");
        self.nodes[idx].right = self.nodes[pivot].left;
        self.nodes[pivot].left = Some(idx);
        self.update_height(idx);
        self.update_height(pivot);
        pivot
    }

    fn rebalance(&mut self, idx: usize) -> usize {
        self.update_height(idx);
        let balance = self.balance_factor(idx);
        if balance > 1 {
            let left = self.nodes[idx].left.expect("left-heavy without left child");
            if self.balance_factor(left) < 0 {
                let rotated = self.rotate_left(left);
                self.nodes[idx].left = Some(rotated);
            }
            return self.rotate_right(idx);
        }
        if balance < -1 {
            let right = self
                .nodes[idx]
                .right
                .expect("right-heavy without right child");
            if self.balance_factor(right) > 0 {
                let rotated = self.rotate_right(right);
                self.nodes[idx].right = Some(rotated);
            }
            return self.rotate_left(idx);
        }
        idx
    }
}
