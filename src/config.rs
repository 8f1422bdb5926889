use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Parameters shared by the build pipeline and the search session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of branches per node.
    pub degree: usize,
    /// Number of leaf nodes scanned by one jump.
    ///
    /// A jump starting close to the end of the leaf layer scans fewer nodes. The clipped value is
    /// local to that jump; the next query starts again from this value.
    pub chunk_size: u32,
    /// Number of work-groups taking part in a leaf scan. A search session rejects scanners built
    /// for another count.
    pub workgroups: u32,
    /// Directory where index files are dumped and loaded. Persistence is disabled when `None`.
    pub index_dir: Option<PathBuf>,
    /// Number of branches above which the sorter switches to the parallel algorithm.
    pub parallel_sort_threshold: usize,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            degree: 32,
            chunk_size: 32,
            workgroups: 128,
            index_dir: None,
            parallel_sort_threshold: 1 << 16,
        }
    }
}

impl Config {
    /// Sets the maximum number of branches per node.
    #[inline]
    pub fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    /// Sets the number of leaf nodes scanned per jump.
    #[inline]
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the number of scan work-groups.
    #[inline]
    pub fn with_workgroups(mut self, workgroups: u32) -> Self {
        self.workgroups = workgroups;
        self
    }

    /// Sets the directory used to persist built indexes.
    #[inline]
    pub fn with_index_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.index_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Sets the size above which branches are sorted in parallel.
    #[inline]
    pub fn with_parallel_sort_threshold(mut self, threshold: usize) -> Self {
        self.parallel_sort_threshold = threshold;
        self
    }

    /// Checks that every value is in its valid range.
    pub fn validate(&self) -> Result<()> {
        if self.degree < 2 {
            return Err(Error::InvalidConfig(format!(
                "degree must be at least 2, got {}",
                self.degree
            )));
        }
        if self.degree > 256 {
            return Err(Error::InvalidConfig(format!(
                "degree must fit in one work-group of 256 workers, got {}",
                self.degree
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be non-zero".into()));
        }
        if self.workgroups == 0 {
            return Err(Error::InvalidConfig(
                "work-group count must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
