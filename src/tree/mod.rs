/// Bounding box related traits and types.
pub mod bbox;
/// Conversion of dataset points into build branches.
pub mod branch;
/// Level by level construction of the node arena.
pub mod build;
/// Hilbert curve locality keys.
pub mod hilbert;
/// Structure-of-arrays leaf layout.
pub mod soa;
/// Ordering of branches by locality key.
pub mod sort;

use std::ops::Range;

pub use bbox::*;
pub use branch::*;
pub use soa::LeafLayer;

/// Index of a [`Node`] in the arena of a [`HybridTree`]. Arena order is breadth-first order.
pub type NodeID = u32;

/// Whether a [`Node`] references other nodes or dataset points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NodeKind {
    /// Node whose entries reference child nodes.
    Internal = 0,
    /// Node whose entries reference dataset points.
    Leaf = 1,
}

/// One branch of a materialized [`Node`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Entry<const D: usize> {
    /// Box of the referenced point or subtree.
    pub bbox: BoundingBox<[f32; D]>,
    /// Leaf ordinal of the branch.
    ///
    /// A leaf branch at slot `s` of leaf node `n` has ordinal `n * degree + s + 1`. An internal
    /// branch carries the largest ordinal of its subtree.
    pub index: u64,
    /// Referenced [`NodeID`] for internal nodes, dataset position for leaves.
    pub child: u32,
}

/// Node of a [`HybridTree`], holding at most `degree` entries.
#[derive(Clone, Debug, PartialEq)]
pub struct Node<const D: usize> {
    /// Kind of the node.
    pub kind: NodeKind,
    /// Ordered entries of the node.
    pub entries: Vec<Entry<D>>,
}

impl<const D: usize> Node<D> {
    /// Creates a new [`Node`].
    #[inline]
    pub const fn new(kind: NodeKind, entries: Vec<Entry<D>>) -> Self {
        Self { kind, entries }
    }

    /// Box enclosing every entry.
    #[inline]
    pub fn bbox(&self) -> BoundingBox<[f32; D]> {
        BoundingBox::enclosing(self.entries.iter().map(|entry| &entry.bbox))
    }

    /// Largest leaf ordinal reachable from this node.
    #[inline]
    pub fn last_index(&self) -> u64 {
        self.entries.last().map_or(0, |entry| entry.index)
    }
}

/// Static spatial index: a fixed-fanout tree packed in Hilbert order, whose leaf level is mirrored
/// in a [`LeafLayer`] for parallel scanning.
///
/// Nodes live in a single arena in breadth-first order: the root is node `0`, each level follows
/// the previous one and the leaf level comes last.
#[derive(Clone, PartialEq)]
pub struct HybridTree<const D: usize> {
    degree: usize,
    nodes: Vec<Node<D>>,
    level_node_count: Vec<u32>,
    leaves: LeafLayer<D>,
}

impl<const D: usize> HybridTree<D> {
    /// Assembles a [`HybridTree`] from its parts after checking their structural invariants.
    ///
    /// Levels must sum to the arena size and end with the leaf level. Internal entries must point
    /// further down the arena and carry the last ordinal of their child. Leaf entries must carry
    /// their positional ordinal and agree with `leaves` slot by slot.
    pub fn from_parts(
        degree: usize,
        nodes: Vec<Node<D>>,
        level_node_count: Vec<u32>,
        leaves: LeafLayer<D>,
    ) -> crate::Result<Self> {
        use crate::Error::Corrupt;

        let total: u64 = level_node_count.iter().map(|&count| u64::from(count)).sum();
        if total != nodes.len() as u64 {
            return Err(Corrupt(format!(
                "levels sum to {total} nodes, arena holds {}",
                nodes.len()
            )));
        }
        let leaf_count = level_node_count.last().copied().unwrap_or(0) as usize;
        if leaf_count == 0 || leaf_count != leaves.len() || level_node_count[0] != 1 {
            return Err(Corrupt(format!(
                "level counts {level_node_count:?} do not describe {} leaves under one root",
                leaves.len()
            )));
        }
        if leaves.degree() != degree {
            return Err(Corrupt(format!(
                "leaf layer has degree {}, tree has degree {degree}",
                leaves.degree()
            )));
        }

        let leaf_offset = nodes.len() - leaf_count;
        for (id, node) in nodes.iter().enumerate() {
            let expected = if id < leaf_offset {
                NodeKind::Internal
            } else {
                NodeKind::Leaf
            };
            if node.kind != expected || node.entries.is_empty() || node.entries.len() > degree {
                return Err(Corrupt(format!("node {id} is malformed")));
            }
            if node.kind == NodeKind::Internal {
                for entry in &node.entries {
                    let child = entry.child as usize;
                    if child <= id || child >= nodes.len() {
                        return Err(Corrupt(format!("node {id} references a node out of range")));
                    }
                    if entry.index != nodes[child].last_index() {
                        return Err(Corrupt(format!(
                            "node {id} carries ordinal {} for node {child}, which ends at {}",
                            entry.index,
                            nodes[child].last_index()
                        )));
                    }
                }
                continue;
            }

            let n = id - leaf_offset;
            if leaves.branch_count(n) != node.entries.len() {
                return Err(Corrupt(format!(
                    "leaf node {n} holds {} branches, leaf layer records {}",
                    node.entries.len(),
                    leaves.branch_count(n)
                )));
            }
            for (s, entry) in node.entries.iter().enumerate() {
                let ordinal = (n * degree + s + 1) as u64;
                if entry.index != ordinal {
                    return Err(Corrupt(format!(
                        "leaf node {n} slot {s} has ordinal {}, expected {ordinal}",
                        entry.index
                    )));
                }
                let bbox = leaves.bbox(n, s);
                let same_bits = |a: &[f32; D], b: &[f32; D]| {
                    a.iter().zip(b).all(|(a, b)| a.to_bits() == b.to_bits())
                };
                if leaves.id(n, s) != entry.child
                    || !same_bits(&bbox.min, &entry.bbox.min)
                    || !same_bits(&bbox.max, &entry.bbox.max)
                {
                    return Err(Corrupt(format!(
                        "leaf node {n} slot {s} disagrees with the leaf layer"
                    )));
                }
            }
        }

        Ok(Self {
            degree,
            nodes,
            level_node_count,
            leaves,
        })
    }

    /// Maximum number of branches per node.
    #[inline]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    /// Every node in breadth-first order.
    #[inline]
    pub fn nodes(&self) -> &[Node<D>] {
        &self.nodes
    }

    /// Number of nodes per level, root first.
    #[inline]
    pub fn level_node_count(&self) -> &[u32] {
        &self.level_node_count
    }

    /// Number of levels.
    #[inline]
    pub fn height(&self) -> usize {
        self.level_node_count.len()
    }

    /// Number of nodes.
    #[inline]
    pub fn total_node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Number of leaf nodes.
    #[inline]
    pub fn leaf_node_count(&self) -> u32 {
        self.leaves.len() as u32
    }

    /// Arena position of the first leaf node.
    #[inline]
    pub fn leaf_node_offset(&self) -> usize {
        self.nodes.len() - self.leaves.len()
    }

    /// Leaf level in structure-of-arrays layout.
    #[inline]
    pub fn leaves(&self) -> &LeafLayer<D> {
        &self.leaves
    }

    /// Arena ranges of every level, root first.
    pub fn levels(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.level_node_count
            .iter()
            .scan(0usize, |start, &count| {
                let range = *start..*start + count as usize;
                *start = range.end;
                Some(range)
            })
    }

    /// Number of dataset points indexed by the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.leaves.counts().iter().map(|&count| count as usize).sum()
    }

    /// Always `false`: a built tree indexes at least one point.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the leaf ordinal where the next scan for `query` should start.
    ///
    /// Walks the internal nodes from the root, descending only into entries that overlap `query`
    /// and whose ordinal exceeds `visited`. At a leaf node the first ordinal greater than
    /// `visited` is returned. `None` means no unvisited leaf can overlap `query`. Every visited
    /// node increments `visits`.
    #[inline]
    pub fn traverse(
        &self,
        query: &BoundingBox<[f32; D]>,
        visited: u64,
        visits: &mut u64,
    ) -> Option<u64> {
        self.traverse_node(0, query, visited, visits)
    }

    fn traverse_node(
        &self,
        id: usize,
        query: &BoundingBox<[f32; D]>,
        visited: u64,
        visits: &mut u64,
    ) -> Option<u64> {
        *visits += 1;
        let node = &self.nodes[id];

        match node.kind {
            NodeKind::Internal => node
                .entries
                .iter()
                .filter(|entry| entry.index > visited && entry.bbox.overlaps(query))
                .find_map(|entry| self.traverse_node(entry.child as usize, query, visited, visits)),
            NodeKind::Leaf => node
                .entries
                .iter()
                .map(|entry| entry.index)
                .find(|&index| index > visited),
        }
    }
}

impl<const D: usize> std::fmt::Debug for HybridTree<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridTree")
            .field("dims", &D)
            .field("degree", &self.degree)
            .field("level_node_count", &self.level_node_count)
            .field("total_node_count", &self.total_node_count())
            .field("leaf_node_count", &self.leaf_node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataset::PointSet, Config};

    fn grid(side: usize) -> PointSet {
        let points: Vec<[f32; 2]> = (0..side * side)
            .map(|i| [(i % side) as f32, (i / side) as f32])
            .collect();
        PointSet::from_points("grid", &points)
    }

    #[test]
    fn levels_cover_the_arena() {
        let tree = HybridTree::<2>::build(&grid(10), &Config::default().with_degree(4)).unwrap();
        let levels: Vec<_> = tree.levels().collect();

        assert_eq!(levels.first(), Some(&(0..1)));
        assert_eq!(levels.last().map(|r| r.end), Some(tree.nodes().len()));
        assert_eq!(levels.last().map(|r| r.start), Some(tree.leaf_node_offset()));
    }

    #[test]
    fn traversal_skips_visited_leaves() {
        let tree = HybridTree::<2>::build(&grid(10), &Config::default().with_degree(4)).unwrap();
        let everything = BoundingBox::new([0.0, 0.0], [9.0, 9.0]);
        let mut visits = 0;

        assert_eq!(tree.traverse(&everything, 0, &mut visits), Some(1));
        assert_eq!(visits, tree.height() as u64);

        // Past the last ordinal nothing remains.
        let last = tree.nodes()[0].last_index();
        assert_eq!(tree.traverse(&everything, last, &mut visits), None);

        // Resuming after the first leaf node lands on the second one.
        assert_eq!(tree.traverse(&everything, 4, &mut visits), Some(5));
    }

    #[test]
    fn traversal_ignores_disjoint_queries() {
        let tree = HybridTree::<2>::build(&grid(10), &Config::default().with_degree(4)).unwrap();
        let outside = BoundingBox::new([20.0, 20.0], [30.0, 30.0]);
        let mut visits = 0;

        assert_eq!(tree.traverse(&outside, 0, &mut visits), None);
        assert_eq!(visits, 1);
    }

    #[test]
    fn from_parts_rejects_bad_levels() {
        let tree = HybridTree::<2>::build(&grid(4), &Config::default().with_degree(4)).unwrap();
        let mut levels = tree.level_node_count().to_vec();
        levels[0] += 1;

        assert!(HybridTree::from_parts(
            tree.degree(),
            tree.nodes().to_vec(),
            levels,
            tree.leaves().clone()
        )
        .is_err());
    }

    fn reassemble(tree: &HybridTree<2>, nodes: Vec<Node<2>>) -> crate::Result<HybridTree<2>> {
        HybridTree::from_parts(
            tree.degree(),
            nodes,
            tree.level_node_count().to_vec(),
            tree.leaves().clone(),
        )
    }

    #[test]
    fn from_parts_rejects_bad_ordinals() {
        let tree = HybridTree::<2>::build(&grid(10), &Config::default().with_degree(4)).unwrap();
        assert!(reassemble(&tree, tree.nodes().to_vec()).is_ok());

        let offset = tree.leaf_node_offset();
        let mut nodes = tree.nodes().to_vec();
        nodes[offset].entries[0].index = 1_000_000;
        assert!(matches!(reassemble(&tree, nodes), Err(crate::Error::Corrupt(_))));

        let mut nodes = tree.nodes().to_vec();
        nodes[0].entries[0].index += 1;
        assert!(matches!(reassemble(&tree, nodes), Err(crate::Error::Corrupt(_))));
    }

    #[test]
    fn from_parts_rejects_leaf_layer_mismatch() {
        let tree = HybridTree::<2>::build(&grid(10), &Config::default().with_degree(4)).unwrap();
        let offset = tree.leaf_node_offset();

        let mut nodes = tree.nodes().to_vec();
        nodes[offset].entries[1].child += 1;
        assert!(matches!(reassemble(&tree, nodes), Err(crate::Error::Corrupt(_))));

        let mut nodes = tree.nodes().to_vec();
        nodes[offset + 2].entries[3].bbox.max[0] += 0.5;
        assert!(matches!(reassemble(&tree, nodes), Err(crate::Error::Corrupt(_))));

        let mut nodes = tree.nodes().to_vec();
        nodes[offset + 1].entries.pop();
        assert!(matches!(reassemble(&tree, nodes), Err(crate::Error::Corrupt(_))));
    }
}
