use std::path::PathBuf;

/// Alias for results returned by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while building, persisting or searching a [`HybridTree`](crate::HybridTree).
///
/// Only [`Error::NotFound`] is recoverable: it signals that no dump exists yet for an index name
/// and a fresh build should be performed. Every other variant means the index or the session can
/// not be trusted and the operation was aborted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The dataset dimensionality does not match the dimensionality of the index.
    #[error("dataset has {found} dimensions but the index expects {expected}")]
    DimensionMismatch {
        /// Dimensionality of the index.
        expected: usize,
        /// Dimensionality reported by the dataset.
        found: usize,
    },

    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The build pipeline could not produce a valid tree from its input.
    #[error("degenerate build: {0}")]
    DegenerateBuild(String),

    /// No index file exists under the given path.
    #[error("index file {} does not exist", .0.display())]
    NotFound(PathBuf),

    /// Reading or writing an index file failed.
    #[error("I/O failure on index file {}: {source}", path.display())]
    Io {
        /// Index file being accessed.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// An index file was read successfully but its contents are inconsistent.
    #[error("corrupt index file: {0}")]
    Corrupt(String),

    /// The compute device could not allocate, copy or read back a buffer.
    #[error("device failure: {0}")]
    Device(String),
}

impl Error {
    /// Returns `true` if the caller can recover from this error by rebuilding the index.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_index_is_recoverable() {
        assert!(Error::NotFound(PathBuf::from("a.idx")).is_recoverable());
        assert!(!Error::Corrupt("short read".into()).is_recoverable());
        assert!(!Error::Device("lost".into()).is_recoverable());
        assert!(!Error::DimensionMismatch {
            expected: 3,
            found: 2
        }
        .is_recoverable());
    }

    #[test]
    fn messages_name_the_problem() {
        let error = Error::DimensionMismatch {
            expected: 3,
            found: 2,
        };
        assert_eq!(
            error.to_string(),
            "dataset has 2 dimensions but the index expects 3"
        );
    }
}
