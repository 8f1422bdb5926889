#![warn(missing_docs)]
//! # Hybrid tree
//!
//! A static spatial index answering axis-aligned box-overlap queries over large point sets, with
//! the work split between a host and a compute device.
//!
//! ## Goals
//!
//! The tree is built once, bottom-up, from points ordered along a Hilbert curve, so that spatially
//! close points end up in the same or neighbouring leaf nodes. Its upper levels are small and
//! walked on the host, while the leaf level, by far the largest, is handed to a device as one
//! flat structure-of-arrays and scanned in contiguous runs of nodes. A query alternates between a
//! short host traversal finding the next overlapping leaf and a device scan of the run of leaves
//! starting there, until no unvisited leaf can overlap.
//!
//! The device side is abstracted by the [`LeafScanner`](compute_method::LeafScanner) trait.
//! [`sequential`] provides a single-threaded scanner, the `parallel` feature one running on
//! [rayon](https://github.com/rayon-rs/rayon) and the `gpu` feature one running on
//! [wgpu](https://github.com/gfx-rs/wgpu). Every scanner follows the same work-group protocol and
//! reports the same counters.
//!
//! ## Using the hybrid tree
//!
//! ```
//! use hybrid_tree::prelude::*;
//!
//! let points: Vec<[f32; 2]> = (0..400)
//!     .map(|i| [(i % 20) as f32, (i / 20) as f32])
//!     .collect();
//! let data = PointSet::from_points("grid", &points);
//!
//! let config = Config::default()
//!     .with_degree(8)
//!     .with_chunk_size(4)
//!     .with_workgroups(4);
//! let tree = HybridTree::<2>::build(&data, &config).unwrap();
//!
//! let query = BoundingBox::new([0.0, 0.0], [1.0, 2.0]);
//! let mut session = SearchSession::new(&tree, &config, SequentialScanner::new(4)).unwrap();
//! let report = session.search(&[query], 1).unwrap();
//!
//! assert_eq!(report.hits, 6);
//! assert_eq!(brute_force(tree.leaves(), &query).hits, 6);
//! ```
//!
//! Trees can be written to and read back from disk with [`HybridTree::dump`] and
//! [`HybridTree::load`], or transparently cached by setting [`Config::index_dir`] and building
//! with [`HybridTree::build_or_load`].

/// Interface between the host traversal and the devices scanning leaf nodes.
pub mod compute_method;

/// Build and search parameters.
pub mod config;

/// Input point sets and query sets.
pub mod dataset;

/// Error and result types.
pub mod error;

/// Leaf scanning on the GPU.
#[cfg(feature = "gpu")]
pub mod gpu;

/// Leaf scanning and exhaustive search on multiple threads.
#[cfg(feature = "parallel")]
pub mod parallel;

pub mod persist;

/// Wall-clock timing of build and search phases.
pub mod recorder;

/// Query evaluation against a built tree.
pub mod search;

/// Leaf scanning and exhaustive search on the calling thread.
pub mod sequential;

/// Tree structure and construction.
pub mod tree;

pub use config::Config;
pub use error::{Error, Result};
pub use tree::HybridTree;

/// Everything needed to use the crate.
pub mod prelude {
    pub use crate::compute_method::{GroupCounters, LeafScanner};
    pub use crate::dataset::{DataSet, PointSet, QuerySet};
    pub use crate::search::{SearchReport, SearchSession};
    pub use crate::sequential::{brute_force, BruteForceResult, SequentialScanner};
    pub use crate::tree::BoundingBox;
    pub use crate::{Config, Error, HybridTree, Result};

    #[cfg(feature = "gpu")]
    pub use crate::gpu::GpuScanner;
    #[cfg(feature = "parallel")]
    pub use crate::parallel::{BruteForce, ParallelScanner};
}
