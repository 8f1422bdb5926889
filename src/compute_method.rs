use crate::{
    tree::{BoundingBox, LeafLayer},
    Result,
};

/// Running totals of one scan session, one slot per work-group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupCounters {
    /// Overlapping branches found by each work-group.
    pub hits: Vec<u32>,
    /// Leaf nodes visited by each work-group.
    pub visits: Vec<u32>,
}

impl GroupCounters {
    /// Creates zeroed counters for `workgroups` work-groups.
    #[inline]
    pub fn new(workgroups: u32) -> Self {
        Self {
            hits: vec![0; workgroups as usize],
            visits: vec![0; workgroups as usize],
        }
    }

    /// Sum of the hits of every work-group.
    #[inline]
    pub fn total_hits(&self) -> u64 {
        self.hits.iter().map(|&hit| u64::from(hit)).sum()
    }

    /// Sum of the leaf node visits of every work-group.
    #[inline]
    pub fn total_visits(&self) -> u64 {
        self.visits.iter().map(|&visit| u64::from(visit)).sum()
    }
}

/// Compute-offload interface for the leaf level of a [`HybridTree`](crate::HybridTree).
///
/// An implementation owns a private copy of the [`LeafLayer`] for the duration of a search
/// session and evaluates ranges of leaf nodes against a query with `workgroups` groups of
/// workers, one worker per branch slot. Work-group `g` visits leaf nodes
/// `start + g`, `start + g + workgroups`, ... below `start + chunk`. The overlap flags of a group
/// are folded with [`reduce_workgroup`] and added to the group's running totals.
///
/// Scans are blocking: when [`LeafScanner::scan`] returns the work has completed and its effect
/// on the counters is visible.
pub trait LeafScanner<const D: usize> {
    /// Copies `leaves` into the memory used by the scanner, replacing any previous copy, and
    /// zeroes the counters.
    fn stage(&mut self, leaves: &LeafLayer<D>) -> Result<()>;

    /// Number of work-groups taking part in a scan.
    fn workgroups(&self) -> u32;

    /// Evaluates leaf nodes `start..start + chunk` against `query`.
    ///
    /// The range must lie within the staged layer.
    fn scan(&mut self, query: &BoundingBox<[f32; D]>, start: u32, chunk: u32) -> Result<()>;

    /// Current running totals.
    fn counters(&mut self) -> Result<GroupCounters>;

    /// Zeroes the running totals.
    fn reset_counters(&mut self) -> Result<()>;
}

impl<const D: usize, S> LeafScanner<D> for &mut S
where
    S: LeafScanner<D> + ?Sized,
{
    #[inline]
    fn stage(&mut self, leaves: &LeafLayer<D>) -> Result<()> {
        (**self).stage(leaves)
    }

    #[inline]
    fn workgroups(&self) -> u32 {
        (**self).workgroups()
    }

    #[inline]
    fn scan(&mut self, query: &BoundingBox<[f32; D]>, start: u32, chunk: u32) -> Result<()> {
        (**self).scan(query, start, chunk)
    }

    #[inline]
    fn counters(&mut self) -> Result<GroupCounters> {
        (**self).counters()
    }

    #[inline]
    fn reset_counters(&mut self) -> Result<()> {
        (**self).reset_counters()
    }
}

/// Tree reduction of the per-worker flags of one work-group, in the same order a device performs
/// it: at every step the first half of the live workers adds the value of their partner in the
/// second half. The length of `flags` must be a power of two. Returns the group total.
pub fn reduce_workgroup(flags: &mut [u32]) -> u32 {
    debug_assert!(flags.len().is_power_of_two());

    let mut stride = flags.len() / 2;
    while stride > 0 {
        for worker in 0..stride {
            flags[worker] += flags[worker + stride];
        }
        stride /= 2;
    }
    flags.first().copied().unwrap_or(0)
}

/// Emulates one work-group of a leaf scan on the calling thread.
///
/// Returns the reduced hit count and the number of leaf nodes visited by group `group`.
pub(crate) fn scan_workgroup<const D: usize>(
    leaves: &LeafLayer<D>,
    query: &BoundingBox<[f32; D]>,
    start: u32,
    chunk: u32,
    group: u32,
    workgroups: u32,
    flags: &mut [u32],
) -> (u32, u32) {
    flags.fill(0);
    let mut visits = 0;

    for node in (group..chunk).step_by(workgroups as usize) {
        let node = (start + node) as usize;
        visits += 1;
        for (worker, flag) in flags.iter_mut().enumerate() {
            if worker < leaves.branch_count(node) && leaves.overlaps(node, worker, query) {
                *flag += 1;
            }
        }
    }

    (reduce_workgroup(flags), visits)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{dataset::PointSet, search::SearchSession, Config, HybridTree};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// 1000 points on a 10 × 10 × 10 integer grid.
    pub fn grid_points() -> PointSet {
        let points: Vec<[f32; 3]> = (0..1000)
            .map(|i| [(i % 10) as f32, ((i / 10) % 10) as f32, (i / 100) as f32])
            .collect();
        PointSet::from_points("grid", &points)
    }

    /// Box overlapping exactly 12 points of [`grid_points`].
    pub fn twelve_point_query() -> BoundingBox<[f32; 3]> {
        BoundingBox::new([0.0, 0.0, 0.0], [1.0, 1.0, 2.0])
    }

    pub fn random_queries(count: usize, seed: u64) -> Vec<BoundingBox<[f32; 3]>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let min: [f32; 3] = std::array::from_fn(|_| rng.gen_range(-1.0..9.0));
                let max = std::array::from_fn(|d| min[d] + rng.gen_range(0.0..4.0));
                BoundingBox::new(min, max)
            })
            .collect()
    }

    fn brute_force_hits(tree: &HybridTree<3>, query: &BoundingBox<[f32; 3]>) -> u64 {
        let leaves = tree.leaves();
        (0..leaves.len())
            .map(|node| u64::from(leaves.count_overlaps(node, query)))
            .sum()
    }

    /// Checks a scanner against an exhaustive scan: full-range scans, clipped chunk scans and
    /// complete search sessions.
    pub fn scan_matches_brute_force<S: LeafScanner<3>>(mut scanner: S) {
        let _ = env_logger::builder().is_test(true).try_init();

        let config = Config::default()
            .with_degree(4)
            .with_chunk_size(8)
            .with_workgroups(scanner.workgroups());
        let tree = HybridTree::<3>::build(&grid_points(), &config).unwrap();
        let leaf_count = tree.leaf_node_count();

        scanner.stage(tree.leaves()).unwrap();
        scanner
            .scan(&twelve_point_query(), 0, leaf_count)
            .unwrap();
        let counters = scanner.counters().unwrap();
        assert_eq!(counters.total_hits(), 12);
        assert_eq!(counters.total_visits(), u64::from(leaf_count));
        assert_eq!(counters.hits.len(), scanner.workgroups() as usize);

        // A chunk at the very end of the layer.
        scanner.reset_counters().unwrap();
        let everything = BoundingBox::new([0.0; 3], [9.0; 3]);
        scanner.scan(&everything, leaf_count - 3, 3).unwrap();
        let counters = scanner.counters().unwrap();
        assert_eq!(counters.total_visits(), 3);
        assert_eq!(counters.total_hits(), 12);

        let queries = random_queries(25, 9);
        let mut session = SearchSession::new(&tree, &config, &mut scanner).unwrap();
        let report = session.search(&queries, queries.len()).unwrap();
        let expected: u64 = queries.iter().map(|q| brute_force_hits(&tree, q)).sum();
        assert_eq!(report.hits, expected);
        for (query, hits) in queries.iter().zip(&report.query_hits) {
            assert_eq!(*hits, brute_force_hits(&tree, query));
        }
    }

    #[test]
    fn reduction_sums_every_worker() {
        let mut flags = [1, 0, 3, 1, 0, 0, 2, 1];
        assert_eq!(reduce_workgroup(&mut flags), 8);
        assert_eq!(reduce_workgroup(&mut [5]), 5);
    }

    #[test]
    fn workgroups_stride_over_chunk() {
        let tree =
            HybridTree::<3>::build(&grid_points(), &Config::default().with_degree(4)).unwrap();
        let everything = BoundingBox::new([0.0; 3], [9.0; 3]);
        let mut flags = [0; 4];

        // Ten nodes over four groups: groups 0 and 1 visit three nodes, groups 2 and 3 visit two.
        let visits: Vec<u32> = (0..4)
            .map(|group| scan_workgroup(tree.leaves(), &everything, 5, 10, group, 4, &mut flags).1)
            .collect();
        assert_eq!(visits, [3, 3, 2, 2]);

        let hits: u32 = (0..4)
            .map(|group| scan_workgroup(tree.leaves(), &everything, 5, 10, group, 4, &mut flags).0)
            .sum();
        assert_eq!(hits, 40);
    }
}
