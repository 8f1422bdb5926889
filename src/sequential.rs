use crate::{
    compute_method::{scan_workgroup, GroupCounters, LeafScanner},
    tree::{BoundingBox, LeafLayer},
    Error, Result,
};

/// Leaf scanner running every work-group one after the other on the calling thread.
///
/// Follows the device protocol step by step (strided node assignment, one flag per worker, tree
/// reduction, one publish per group), which makes it the reference the other scanners are
/// checked against.
#[derive(Clone, Debug)]
pub struct SequentialScanner<const D: usize> {
    leaves: Option<LeafLayer<D>>,
    workgroups: u32,
    counters: GroupCounters,
    flags: Vec<u32>,
}

impl<const D: usize> SequentialScanner<D> {
    /// Creates a new [`SequentialScanner`] emulating `workgroups` work-groups.
    #[inline]
    pub fn new(workgroups: u32) -> Self {
        Self {
            leaves: None,
            workgroups,
            counters: GroupCounters::new(workgroups),
            flags: Vec::new(),
        }
    }
}

impl<const D: usize> LeafScanner<D> for SequentialScanner<D> {
    fn stage(&mut self, leaves: &LeafLayer<D>) -> Result<()> {
        self.flags = vec![0; leaves.degree().next_power_of_two()];
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

        for group in 0..self.workgroups {
            let (hits, visits) = scan_workgroup(
                leaves,
                query,
                start,
                chunk,
                group,
                self.workgroups,
                &mut self.flags,
            );
            self.counters.hits[group as usize] += hits;
            self.counters.visits[group as usize] += visits;
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

/// Returns the staged layer if `start..start + chunk` lies within it.
pub(crate) fn staged<const D: usize>(
    leaves: &Option<LeafLayer<D>>,
    start: u32,
    chunk: u32,
) -> Result<&LeafLayer<D>> {
    let leaves = leaves
        .as_ref()
        .ok_or_else(|| Error::Device("no leaf layer staged".into()))?;

    if start as usize + chunk as usize > leaves.len() {
        return Err(Error::Device(format!(
            "scan of leaf nodes {start}..{} exceeds the {} staged nodes",
            start as u64 + chunk as u64,
            leaves.len()
        )));
    }
    Ok(leaves)
}

/// Exhaustive scan result: every overlapping branch of the leaf layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BruteForceResult {
    /// Leaf node offset of every overlapping branch, sorted ascending. A node appears once per
    /// overlapping branch.
    pub offsets: Vec<u32>,
    /// Number of overlapping branches.
    pub hits: u64,
}

impl BruteForceResult {
    /// Concatenates partial results and sorts the offsets.
    pub fn merge<I: IntoIterator<Item = Self>>(parts: I) -> Self {
        let mut result = parts
            .into_iter()
            .fold(Self::default(), |mut result, part| {
                result.offsets.extend(part.offsets);
                result.hits += part.hits;
                result
            });
        result.offsets.sort_unstable();
        result
    }
}

/// Scans leaf nodes `nodes` of `leaves` against `query` on the calling thread.
pub fn brute_force_range<const D: usize>(
    leaves: &LeafLayer<D>,
    query: &BoundingBox<[f32; D]>,
    nodes: std::ops::Range<usize>,
) -> BruteForceResult {
    let mut result = BruteForceResult::default();
    for node in nodes {
        for slot in 0..leaves.branch_count(node) {
            if leaves.overlaps(node, slot, query) {
                result.offsets.push(node as u32);
                result.hits += 1;
            }
        }
    }
    result
}

/// Single-threaded exhaustive scan of the whole leaf layer.
#[inline]
pub fn brute_force<const D: usize>(
    leaves: &LeafLayer<D>,
    query: &BoundingBox<[f32; D]>,
) -> BruteForceResult {
    brute_force_range(leaves, query, 0..leaves.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compute_method::tests::{self, grid_points, twelve_point_query},
        Config, HybridTree,
    };

    #[test]
    fn scanner() {
        tests::scan_matches_brute_force(SequentialScanner::new(7));
    }

    #[test]
    fn single_workgroup() {
        tests::scan_matches_brute_force(SequentialScanner::new(1));
    }

    #[test]
    fn brute_force_twelve_points() {
        let tree =
            HybridTree::<3>::build(&grid_points(), &Config::default().with_degree(4)).unwrap();
        let result = brute_force(tree.leaves(), &twelve_point_query());

        assert_eq!(result.hits, 12);
        assert_eq!(result.offsets.len(), 12);
        assert!(result.offsets.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn scan_past_layer_end_fails() {
        let tree =
            HybridTree::<3>::build(&grid_points(), &Config::default().with_degree(4)).unwrap();
        let mut scanner = SequentialScanner::new(2);
        scanner.stage(tree.leaves()).unwrap();

        assert!(scanner.scan(&twelve_point_query(), 249, 1).is_ok());
        assert!(scanner.scan(&twelve_point_query(), 249, 2).is_err());
    }

    #[test]
    fn scan_requires_staging() {
        let mut scanner = SequentialScanner::<3>::new(2);
        assert!(scanner.scan(&twelve_point_query(), 0, 1).is_err());
    }
}
