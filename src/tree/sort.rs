use crate::tree::Branch;

/// Which algorithm [`sort_branches`] used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortStrategy {
    /// Single-threaded stable sort.
    Sequential,
    /// Stable sort spread over the rayon thread pool.
    Parallel,
}

/// Stable sort of `branches` by ascending locality key.
///
/// Inputs longer than `parallel_threshold` are sorted on the rayon thread pool when the
/// `parallel` feature is enabled. Both strategies keep equal keys in input order.
pub fn sort_branches<const D: usize>(
    branches: &mut [Branch<D>],
    parallel_threshold: usize,
) -> SortStrategy {
    #[cfg(feature = "parallel")]
    {
        use rayon::slice::ParallelSliceMut;

        if branches.len() > parallel_threshold {
            branches.par_sort_by_key(|branch| branch.key);
            return SortStrategy::Parallel;
        }
    }

    #[cfg(not(feature = "parallel"))]
    let _ = parallel_threshold;

    branches.sort_by_key(|branch| branch.key);
    SortStrategy::Sequential
}
