//! Static interval tree for scatter lookups.
//!
//! Built once from a list of inclusive intervals, then only queried. Nodes
//! live in a vector sorted by start; the subtree of `[lo, hi)` is rooted at
//! its midpoint, which also stores the largest end in that subtree.

use super::ranges::ByteRange;

#[derive(Debug, Clone)]
struct Node<T> {
    range: ByteRange,
    value: T,
    max_end: u64,
}

#[derive(Debug, Clone)]
pub struct IntervalTree<T> {
    nodes: Vec<Node<T>>,
}

impl<T: Copy> IntervalTree<T> {
    pub fn new(entries: impl IntoIterator<Item = (ByteRange, T)>) -> Self {
        let mut nodes: Vec<Node<T>> = entries
            .into_iter()
            .map(|(range, value)| Node {
                range,
                value,
                max_end: range.end,
            })
            .collect();
        nodes.sort_by_key(|n| (n.range.start, n.range.end));
        augment(&mut nodes);
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Values of every interval overlapping `query`, in start order.
    pub fn overlapping(&self, query: ByteRange) -> Vec<T> {
        let mut out = Vec::new();
        self.visit(0, self.nodes.len(), query, &mut |_, v| out.push(v));
        out
    }

    /// Like [`overlapping`](Self::overlapping), with the matching interval.
    pub fn for_each_overlapping(&self, query: ByteRange, mut f: impl FnMut(ByteRange, T)) {
        self.visit(0, self.nodes.len(), query, &mut f);
    }

    fn visit(&self, lo: usize, hi: usize, query: ByteRange, f: &mut impl FnMut(ByteRange, T)) {
        if lo >= hi {
            return;
        }
        let mid = lo + (hi - lo) / 2;
        let node = &self.nodes[mid];
        if node.max_end < query.start {
            return;
        }
        self.visit(lo, mid, query, f);
        if node.range.overlaps(&query) {
            f(node.range, node.value);
        }
        // Everything to the right starts at or after this node.
        if node.range.start > query.end {
            return;
        }
        self.visit(mid + 1, hi, query, f);
    }
}

fn augment<T>(nodes: &mut [Node<T>]) -> Option<u64> {
    if nodes.is_empty() {
        return None;
    }
    let mid = nodes.len() / 2;
    let (left, rest) = nodes.split_at_mut(mid);
    let (node, right) = rest.split_first_mut()?;
    let mut max_end = node.range.end;
    if let Some(l) = augment(left) {
        max_end = max_end.max(l);
    }
    if let Some(r) = augment(right) {
        max_end = max_end.max(r);
    }
    node.max_end = max_end;
    Some(max_end)
}
