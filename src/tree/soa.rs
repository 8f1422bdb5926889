use crate::{
    tree::{BoundingBox, Node, NodeKind},
    Error, Result,
};

/// Structure-of-arrays copy of the leaf level of a [`HybridTree`](crate::HybridTree).
///
/// Every leaf node occupies a fixed size record so that a scan worker can address branch `s` of
/// leaf node `n` directly:
///
/// - `boundary[n * 2D·degree + d * degree + s]` is the minimum of dimension `d`,
/// - `boundary[n * 2D·degree + (D + d) * degree + s]` is its maximum,
/// - `ids[n * degree + s]` is the dataset position of the point,
/// - `counts[n]` is the number of occupied slots.
///
/// Unoccupied slots are zeroed.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafLayer<const D: usize> {
    degree: usize,
    boundary: Vec<f32>,
    ids: Vec<u32>,
    counts: Vec<u32>,
}

impl<const D: usize> LeafLayer<D> {
    /// Repacks `leaves` into a [`LeafLayer`], preserving node order and branch order within each
    /// node.
    pub fn from_leaves(leaves: &[Node<D>], degree: usize) -> Result<Self> {
        let mut layer = Self {
            degree,
            boundary: vec![0.0; leaves.len() * Self::boundary_stride_for(degree)],
            ids: vec![0; leaves.len() * degree],
            counts: Vec::with_capacity(leaves.len()),
        };

        for (n, node) in leaves.iter().enumerate() {
            if node.kind != NodeKind::Leaf {
                return Err(Error::DegenerateBuild(format!(
                    "node {n} of the leaf level is not a leaf"
                )));
            }
            if node.entries.len() > degree {
                return Err(Error::DegenerateBuild(format!(
                    "leaf node {n} holds {} branches, degree is {degree}",
                    node.entries.len()
                )));
            }

            let base = n * layer.boundary_stride();
            for (s, entry) in node.entries.iter().enumerate() {
                for d in 0..D {
                    layer.boundary[base + d * degree + s] = entry.bbox.min[d];
                    layer.boundary[base + (D + d) * degree + s] = entry.bbox.max[d];
                }
                layer.ids[n * degree + s] = entry.child;
            }
            layer.counts.push(node.entries.len() as u32);
        }

        Ok(layer)
    }

    /// Rebuilds a [`LeafLayer`] from its raw arrays, checking their lengths agree.
    pub fn from_raw(
        degree: usize,
        boundary: Vec<f32>,
        ids: Vec<u32>,
        counts: Vec<u32>,
    ) -> Result<Self> {
        let len = counts.len();
        if boundary.len() != len * Self::boundary_stride_for(degree) || ids.len() != len * degree {
            return Err(Error::Corrupt(format!(
                "leaf layer arrays disagree on {len} nodes of degree {degree}"
            )));
        }
        if let Some(n) = counts.iter().position(|&count| count as usize > degree) {
            return Err(Error::Corrupt(format!(
                "leaf node {n} claims {} branches, degree is {degree}",
                counts[n]
            )));
        }

        Ok(Self {
            degree,
            boundary,
            ids,
            counts,
        })
    }

    #[inline]
    const fn boundary_stride_for(degree: usize) -> usize {
        2 * D * degree
    }

    /// Number of `f32` values in one node record of [`LeafLayer::boundary`].
    #[inline]
    pub const fn boundary_stride(&self) -> usize {
        Self::boundary_stride_for(self.degree)
    }

    /// Maximum number of branches per node.
    #[inline]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    /// Number of leaf nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns `true` if the layer holds no node.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Flat per-dimension bounds of every node.
    #[inline]
    pub fn boundary(&self) -> &[f32] {
        &self.boundary
    }

    /// Dataset positions of every slot.
    #[inline]
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Occupied slots of every node.
    #[inline]
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Number of branches stored in leaf node `node`.
    #[inline]
    pub fn branch_count(&self, node: usize) -> usize {
        self.counts[node] as usize
    }

    /// Dataset position referenced by branch `slot` of leaf node `node`.
    #[inline]
    pub fn id(&self, node: usize, slot: usize) -> u32 {
        self.ids[node * self.degree + slot]
    }

    /// Box of branch `slot` of leaf node `node`.
    pub fn bbox(&self, node: usize, slot: usize) -> BoundingBox<[f32; D]> {
        let base = node * self.boundary_stride();
        BoundingBox::new(
            std::array::from_fn(|d| self.boundary[base + d * self.degree + slot]),
            std::array::from_fn(|d| self.boundary[base + (D + d) * self.degree + slot]),
        )
    }

    /// Overlap test between `query` and branch `slot` of leaf node `node`, reading the bounds in
    /// place.
    #[inline]
    pub fn overlaps(&self, node: usize, slot: usize, query: &BoundingBox<[f32; D]>) -> bool {
        let base = node * self.boundary_stride();
        (0..D).all(|d| {
            self.boundary[base + d * self.degree + slot] <= query.max[d]
                && query.min[d] <= self.boundary[base + (D + d) * self.degree + slot]
        })
    }

    /// Number of branches of leaf node `node` overlapping `query`.
    #[inline]
    pub fn count_overlaps(&self, node: usize, query: &BoundingBox<[f32; D]>) -> u32 {
        (0..self.branch_count(node))
            .filter(|&slot| self.overlaps(node, slot, query))
            .count() as u32
    }
}
