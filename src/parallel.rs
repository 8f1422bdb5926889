use crate::{
    compute_method::{scan_workgroup, GroupCounters, LeafScanner},
    sequential::{brute_force_range, staged, BruteForceResult},
    tree::{BoundingBox, LeafLayer},
    Result,
};
use rayon::prelude::*;

/// Leaf scanner running work-groups as tasks on the rayon thread pool.
///
/// Each task owns the flags of its group, so the only writes to shared state are the per-group
/// totals, published once per group after every task has joined.
#[derive(Clone, Debug)]
pub struct ParallelScanner<const D: usize> {
    leaves: Option<LeafLayer<D>>,
    workgroups: u32,
    counters: GroupCounters,
}

impl<const D: usize> ParallelScanner<D> {
    /// Creates a new [`ParallelScanner`] with `workgroups` work-groups.
    #[inline]
    pub fn new(workgroups: u32) -> Self {
        Self {
            leaves: None,
            workgroups,
            counters: GroupCounters::new(workgroups),
        }
    }
}

impl<const D: usize> LeafScanner<D> for ParallelScanner<D> {
    fn stage(&mut self, leaves: &LeafLayer<D>) -> Result<()> {
        self.leaves = Some(leaves.clone());
        self.counters = GroupCounters::new(self.workgroups);
        Ok(())
    }

    #[inline]
    fn workgroups(&self) -> u32 {
        self.workgroups
    }

    fn scan(&mut self, query: &BoundingBox<[f32; D]>, start: u32, chunk: u32) -> Result<()> {
        let leaves = staged(&self.leaves, start, chunk)?;
        let workgroups = self.workgroups;
        let workers = leaves.degree().next_power_of_two();

        let groups: Vec<(u32, u32)> = (0..workgroups)
            .into_par_iter()
            .map_init(
                || vec![0; workers],
                |flags, group| {
                    scan_workgroup(leaves, query, start, chunk, group, workgroups, flags)
                },
            )
            .collect();

        for (group, (hits, visits)) in groups.into_iter().enumerate() {
            self.counters.hits[group] += hits;
            self.counters.visits[group] += visits;
        }

        Ok(())
    }

    #[inline]
    fn counters(&mut self) -> Result<GroupCounters> {
        Ok(self.counters.clone())
    }

    #[inline]
    fn reset_counters(&mut self) -> Result<()> {
        self.counters = GroupCounters::new(self.workgroups);
        Ok(())
    }
}

/// Multithreaded exhaustive scan of the leaf layer, used as ground truth for the scanners.
///
/// The leaf nodes are split evenly into one partition per thread, the last partition taking the
/// remainder. Every partition is scanned into its own result, and the partial results are
/// concatenated and sorted once all of them are done.
#[derive(Clone, Copy, Debug)]
pub struct BruteForce {
    /// Number of partitions.
    pub threads: usize,
}

impl Default for BruteForce {
    #[inline]
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

impl BruteForce {
    /// Creates a new [`BruteForce`] with the given number of partitions.
    #[inline]
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    /// Leaf node ranges of every partition.
    pub fn partitions(&self, len: usize) -> Vec<std::ops::Range<usize>> {
        let threads = self.threads.max(1);
        let size = len / threads;
        (0..threads)
            .map(|thread| {
                let start = thread * size;
                let end = if thread + 1 == threads {
                    len
                } else {
                    start + size
                };
                start..end
            })
            .collect()
    }

    /// Scans every leaf node against `query`.
    pub fn compute<const D: usize>(
        &self,
        leaves: &LeafLayer<D>,
        query: &BoundingBox<[f32; D]>,
    ) -> BruteForceResult {
        let parts: Vec<BruteForceResult> = self
            .partitions(leaves.len())
            .into_par_iter()
            .map(|nodes| brute_force_range(leaves, query, nodes))
            .collect();

        BruteForceResult::merge(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compute_method::tests::{self, grid_points, random_queries, twelve_point_query},
        sequential::brute_force,
        Config, HybridTree,
    };

    #[test]
    fn scanner() {
        tests::scan_matches_brute_force(ParallelScanner::new(16));
    }

    #[test]
    fn partitions_cover_every_node() {
        let partitions = BruteForce::new(4).partitions(10);
        assert_eq!(partitions, [0..2, 2..4, 4..6, 6..10]);

        let partitions = BruteForce::new(8).partitions(3);
        assert_eq!(partitions.iter().map(|p| p.len()).sum::<usize>(), 3);
        assert_eq!(partitions.last(), Some(&(0..3)));
    }

    #[test]
    fn matches_single_thread() {
        let tree =
            HybridTree::<3>::build(&grid_points(), &Config::default().with_degree(6)).unwrap();

        for query in random_queries(20, 3).iter().chain([&twelve_point_query()]) {
            assert_eq!(
                BruteForce::new(5).compute(tree.leaves(), query),
                brute_force(tree.leaves(), query)
            );
        }
        assert_eq!(
            BruteForce::default()
                .compute(tree.leaves(), &twelve_point_query())
                .hits,
            12
        );
    }
}
