use crate::{
    dataset::DataSet,
    recorder::Recorder,
    tree::{
        branch::collect_branches, hilbert::assign_hilbert_keys, sort::sort_branches, Branch,
        Entry, HybridTree, LeafLayer, Node, NodeKind,
    },
    Config, Error, Result,
};

/// Upper bound on the number of levels. With a degree of at least 2 and `u32` point positions a
/// valid tree never comes close.
pub const MAX_HEIGHT: usize = 64;

/// Number of nodes per level for `count` sorted branches, root first.
pub fn level_sizes(count: usize, degree: usize) -> Result<Vec<u32>> {
    if count == 0 {
        return Err(Error::DegenerateBuild("no branch to group".into()));
    }

    let mut sizes = vec![count.div_ceil(degree)];
    while let Some(&last) = sizes.last().filter(|&&last| last > 1) {
        if sizes.len() >= MAX_HEIGHT {
            return Err(Error::DegenerateBuild(format!(
                "tree exceeds {MAX_HEIGHT} levels"
            )));
        }
        sizes.push(last.div_ceil(degree));
    }

    let total: usize = sizes.iter().sum();
    if total > u32::MAX as usize {
        return Err(Error::DegenerateBuild(format!(
            "{total} nodes can not be addressed"
        )));
    }

    Ok(sizes.into_iter().rev().map(|size| size as u32).collect())
}

/// Groups branches sorted by locality key into a fixed-fanout tree.
///
/// Runs of at most `degree` consecutive branches become leaf nodes; every level above groups the
/// nodes of the level below the same way until a single root remains. Levels are laid out root
/// first so the returned arena is in breadth-first order. Returns the arena and the number of
/// nodes per level.
pub fn build_levels<const D: usize>(
    branches: &[Branch<D>],
    degree: usize,
) -> Result<(Vec<Node<D>>, Vec<u32>)> {
    if degree < 2 {
        return Err(Error::InvalidConfig(format!(
            "degree must be at least 2, got {degree}"
        )));
    }
    if branches.windows(2).any(|pair| pair[0].key > pair[1].key) {
        return Err(Error::DegenerateBuild(
            "branches are not sorted by locality key".into(),
        ));
    }

    let sizes = level_sizes(branches.len(), degree)?;
    let starts: Vec<usize> = sizes
        .iter()
        .scan(0usize, |start, &size| {
            let current = *start;
            *start += size as usize;
            Some(current)
        })
        .collect();
    let height = sizes.len();

    let leaves: Vec<Node<D>> = branches
        .chunks(degree)
        .enumerate()
        .map(|(offset, group)| {
            let entries = group
                .iter()
                .enumerate()
                .map(|(slot, branch)| Entry {
                    bbox: branch.bbox,
                    index: (offset * degree + slot + 1) as u64,
                    child: branch.child,
                })
                .collect();
            Node::new(NodeKind::Leaf, entries)
        })
        .collect();

    let mut below = promote(&leaves, branches, degree, starts[height - 1]);
    let mut levels = vec![leaves];

    for level in (0..height - 1).rev() {
        let nodes: Vec<Node<D>> = below
            .chunks(degree)
            .map(|group| {
                let entries = group
                    .iter()
                    .map(|(branch, index)| Entry {
                        bbox: branch.bbox,
                        index: *index,
                        child: branch.child,
                    })
                    .collect();
                Node::new(NodeKind::Internal, entries)
            })
            .collect();

        if nodes.len() != sizes[level] as usize {
            return Err(Error::DegenerateBuild(format!(
                "level {level} grouped into {} nodes instead of {}",
                nodes.len(),
                sizes[level]
            )));
        }

        let keys: Vec<Branch<D>> = below.iter().map(|(branch, _)| *branch).collect();
        below = promote(&nodes, &keys, degree, starts[level]);
        levels.push(nodes);
    }

    let nodes = levels.into_iter().rev().flatten().collect();
    Ok((nodes, sizes))
}

/// Turns the nodes of one level into branches for the level above. A promoted branch takes the
/// box of its node, the key of the node's first child and the node's largest ordinal.
fn promote<const D: usize>(
    nodes: &[Node<D>],
    children: &[Branch<D>],
    degree: usize,
    start: usize,
) -> Vec<(Branch<D>, u64)> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let branch = Branch {
                bbox: node.bbox(),
                key: children[i * degree].key,
                child: (start + i) as u32,
            };
            (branch, node.last_index())
        })
        .collect()
}

impl<const D: usize> HybridTree<D> {
    /// Builds a [`HybridTree`] from the points of `data`.
    ///
    /// Each point becomes a branch, branches are ordered along a Hilbert curve, grouped level by
    /// level into nodes of at most `config.degree` branches, and the leaf level is repacked into
    /// a [`LeafLayer`].
    pub fn build<T>(data: &T, config: &Config) -> Result<Self>
    where
        T: DataSet + ?Sized,
    {
        config.validate()?;
        log::info!(
            "Building hybrid tree over {} points of {} (degree {})",
            data.len(),
            data.name(),
            config.degree
        );
        let recorder = Recorder::start();

        let mut branches = collect_branches::<D, _>(data)?;
        assign_hilbert_keys(&mut branches)?;
        let strategy = sort_branches(&mut branches, config.parallel_sort_threshold);
        log::debug!("Sorted {} branches ({strategy:?})", branches.len());

        let (nodes, level_node_count) = build_levels(&branches, config.degree)?;
        for (level, count) in level_node_count.iter().enumerate() {
            log::debug!("Level {level}: {count} nodes");
        }

        let leaf_offset = nodes.len() - *level_node_count.last().unwrap_or(&0) as usize;
        let leaves = LeafLayer::from_leaves(&nodes[leaf_offset..], config.degree)?;
        log::info!("Leaf node count {}", leaves.len());

        let tree = Self::from_parts(config.degree, nodes, level_node_count, leaves)?;
        log::info!("Built in {:.3}ms", recorder.elapsed_ms());

        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataset::PointSet, tree::BoundingBox};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_points(count: usize, seed: u64) -> PointSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let points: Vec<[f32; 3]> = (0..count)
            .map(|_| std::array::from_fn(|_| rng.gen_range(0.0..100.0)))
            .collect();
        PointSet::from_points("random", &points)
    }

    #[test]
    fn level_sizes_shrink_to_root() {
        assert_eq!(level_sizes(1000, 4).unwrap(), [1, 4, 16, 63, 250]);
        assert_eq!(level_sizes(3, 4).unwrap(), [1]);
        assert_eq!(level_sizes(16, 4).unwrap(), [1, 4]);
        assert!(level_sizes(0, 4).is_err());
    }

    #[test]
    fn thousand_points_degree_four() {
        let tree = HybridTree::<3>::build(&random_points(1000, 7), &Config::default().with_degree(4))
            .unwrap();

        assert_eq!(tree.leaf_node_count(), 250);
        assert_eq!(tree.level_node_count(), [1, 4, 16, 63, 250]);
        assert_eq!(
            tree.total_node_count(),
            tree.level_node_count().iter().sum::<u32>()
        );
    }

    #[test]
    fn every_point_in_exactly_one_leaf_branch() {
        let data = random_points(777, 11);
        let tree = HybridTree::<3>::build(&data, &Config::default().with_degree(8)).unwrap();

        let mut seen = vec![0u32; data.len()];
        for node in &tree.nodes()[tree.leaf_node_offset()..] {
            for entry in &node.entries {
                seen[entry.child as usize] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
        assert_eq!(tree.len(), data.len());
    }

    #[test]
    fn leaves_follow_key_order() {
        let data = random_points(500, 3);
        let mut branches = collect_branches::<3, _>(&data).unwrap();
        assign_hilbert_keys(&mut branches).unwrap();
        sort_branches(&mut branches, usize::MAX);
        let key_of: std::collections::HashMap<u32, u64> =
            branches.iter().map(|b| (b.child, b.key)).collect();

        let (nodes, sizes) = build_levels(&branches, 6).unwrap();
        let leaf_offset = nodes.len() - *sizes.last().unwrap() as usize;
        let leaf_keys: Vec<(u64, u64)> = nodes[leaf_offset..]
            .iter()
            .map(|node| {
                let keys = node.entries.iter().map(|e| key_of[&e.child]);
                (keys.clone().min().unwrap(), keys.max().unwrap())
            })
            .collect();

        for pair in leaf_keys.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
    }

    #[test]
    fn parents_enclose_children() {
        let tree = HybridTree::<3>::build(&random_points(300, 5), &Config::default().with_degree(5))
            .unwrap();

        for node in &tree.nodes()[..tree.leaf_node_offset()] {
            for entry in &node.entries {
                let child = &tree.nodes()[entry.child as usize];
                let mut bbox = entry.bbox;
                bbox.union(&child.bbox());
                assert_eq!(bbox, entry.bbox);
                assert_eq!(entry.index, child.last_index());
            }
        }
    }

    #[test]
    fn single_leaf_root() {
        let data = PointSet::from_points("tiny", &[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);
        let tree = HybridTree::<3>::build(&data, &Config::default().with_degree(4)).unwrap();

        assert_eq!(tree.level_node_count(), [1]);
        assert_eq!(tree.nodes()[0].kind, NodeKind::Leaf);
        assert_eq!(
            tree.nodes()[0].bbox(),
            BoundingBox::new([0.0; 3], [1.0; 3])
        );
    }

    #[test]
    fn unsorted_input_is_rejected() {
        let mut branches: Vec<Branch<1>> = (0..4)
            .map(|i| Branch::new(BoundingBox::point([i as f32]), i))
            .collect();
        branches[0].key = 9;

        assert!(matches!(
            build_levels(&branches, 2),
            Err(Error::DegenerateBuild(_))
        ));
    }
}
