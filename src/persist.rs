//! Binary persistence of a [`HybridTree`].
//!
//! An index file has the following layout, with every field in native byte order:
//!
//! ```text
//! height            u64
//! level_node_count  height × u32, root first
//! total_node_count  u32
//! leaf_node_count   u32
//! nodes             total_node_count × node record, breadth-first order
//! leaf layer        leaf_node_count × leaf record
//! ```
//!
//! A node record is `kind: u32`, `branch_count: u32`, then `degree` slots of
//! `min: D × f32`, `max: D × f32`, `index: u64`, `child: u32`. A leaf record is the node's
//! `2·D·degree` bounds, `degree` ids and its `branch_count: u32`. Unused slots are zeroed.
//!
//! Child references are arena positions, which are breadth-first positions, so the records are
//! written exactly as they are held in memory and read back into the same arena. Files are meant
//! to be read on the machine that wrote them.

use crate::{
    dataset::DataSet,
    recorder::Recorder,
    tree::{build::MAX_HEIGHT, BoundingBox, Entry, HybridTree, LeafLayer, Node, NodeKind},
    Config, Error, Result,
};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

/// Deterministic file name of the index of `dataset` for the given degree and dimensionality.
#[inline]
pub fn index_name(dataset: &str, degree: usize, dims: usize) -> String {
    format!("{dataset}_hybrid_m{degree}_d{dims}.idx")
}

/// Size in bytes of one node record.
#[inline]
pub const fn node_record_size(dims: usize, degree: usize) -> usize {
    8 + degree * (2 * dims * 4 + 8 + 4)
}

/// Size in bytes of one leaf layer record.
#[inline]
pub const fn leaf_record_size(dims: usize, degree: usize) -> usize {
    2 * dims * degree * 4 + degree * 4 + 4
}

struct IndexWriter<W> {
    inner: W,
    path: PathBuf,
}

impl<W: Write> IndexWriter<W> {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner
            .write_all(bytes)
            .map_err(|e| Error::io(&self.path, e))
    }

    fn put_u32(&mut self, value: u32) -> Result<()> {
        self.put(&value.to_ne_bytes())
    }

    fn put_u64(&mut self, value: u64) -> Result<()> {
        self.put(&value.to_ne_bytes())
    }

    fn put_f32s(&mut self, values: &[f32]) -> Result<()> {
        self.put(bytemuck::cast_slice(values))
    }

    fn put_u32s(&mut self, values: &[u32]) -> Result<()> {
        self.put(bytemuck::cast_slice(values))
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush().map_err(|e| Error::io(&self.path, e))
    }
}

struct IndexReader<R> {
    inner: R,
    path: PathBuf,
}

impl<R: Read> IndexReader<R> {
    fn fill(&mut self, bytes: &mut [u8]) -> Result<()> {
        self.inner.read_exact(bytes).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::Corrupt(format!("{} is truncated", self.path.display()))
            }
            _ => Error::io(&self.path, e),
        })
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = [0; 4];
        self.fill(&mut bytes)?;
        Ok(u32::from_ne_bytes(bytes))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut bytes = [0; 8];
        self.fill(&mut bytes)?;
        Ok(u64::from_ne_bytes(bytes))
    }

    fn read_f32s(&mut self, len: usize) -> Result<Vec<f32>> {
        let mut values = vec![0.0f32; len];
        self.fill(bytemuck::cast_slice_mut(&mut values))?;
        Ok(values)
    }

    fn read_u32s(&mut self, len: usize) -> Result<Vec<u32>> {
        let mut values = vec![0u32; len];
        self.fill(bytemuck::cast_slice_mut(&mut values))?;
        Ok(values)
    }
}

impl<const D: usize> HybridTree<D> {
    /// Writes the tree to `path`.
    ///
    /// The file is first written next to `path` and renamed once complete, so a failed dump
    /// never leaves a truncated index behind.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        log::info!("Dump an index into file ({})", path.display());
        let recorder = Recorder::start();

        let partial = path.with_extension("idx.partial");
        let file = File::create(&partial).map_err(|e| Error::io(&partial, e))?;
        let mut writer = IndexWriter {
            inner: BufWriter::new(file),
            path: partial.clone(),
        };

        writer.put_u64(self.height() as u64)?;
        for &count in self.level_node_count() {
            writer.put_u32(count)?;
        }
        writer.put_u32(self.total_node_count())?;
        writer.put_u32(self.leaf_node_count())?;

        let degree = self.degree();
        let empty = Entry {
            bbox: BoundingBox::new([0.0; D], [0.0; D]),
            index: 0,
            child: 0,
        };
        for node in self.nodes() {
            writer.put_u32(node.kind as u32)?;
            writer.put_u32(node.entries.len() as u32)?;
            for slot in 0..degree {
                let entry = node.entries.get(slot).unwrap_or(&empty);
                writer.put_f32s(&entry.bbox.min)?;
                writer.put_f32s(&entry.bbox.max)?;
                writer.put_u64(entry.index)?;
                writer.put_u32(entry.child)?;
            }
        }

        let leaves = self.leaves();
        let stride = leaves.boundary_stride();
        for n in 0..leaves.len() {
            writer.put_f32s(&leaves.boundary()[n * stride..(n + 1) * stride])?;
            writer.put_u32s(&leaves.ids()[n * degree..(n + 1) * degree])?;
            writer.put_u32(leaves.counts()[n])?;
        }

        writer.flush()?;
        drop(writer);
        std::fs::rename(&partial, path).map_err(|e| Error::io(path, e))?;

        log::info!("Done, time = {:.3}ms", recorder.elapsed_ms());
        Ok(())
    }

    /// Reads a tree of the given degree from `path`.
    ///
    /// Returns [`Error::NotFound`] if the file does not exist.
    pub fn load(path: impl AsRef<Path>, degree: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(Error::io(path, e)),
        };
        let file_len = file.metadata().map_err(|e| Error::io(path, e))?.len();

        log::info!("Load an index file ({})", path.display());
        let recorder = Recorder::start();

        let mut reader = IndexReader {
            inner: BufReader::new(file),
            path: path.to_path_buf(),
        };

        let height = reader.read_u64()?;
        if height == 0 || height as usize > MAX_HEIGHT {
            return Err(Error::Corrupt(format!("tree height {height} is out of range")));
        }
        let level_node_count = reader.read_u32s(height as usize)?;
        let total = reader.read_u32()? as usize;
        let leaf = reader.read_u32()? as usize;

        let expected = 8
            + 4 * height
            + 8
            + (total * node_record_size(D, degree)) as u64
            + (leaf * leaf_record_size(D, degree)) as u64;
        if expected != file_len {
            return Err(Error::Corrupt(format!(
                "expected {expected} bytes for {total} nodes and {leaf} leaves, file holds {file_len}"
            )));
        }

        let mut nodes = Vec::with_capacity(total);
        for id in 0..total {
            let kind = match reader.read_u32()? {
                0 => NodeKind::Internal,
                1 => NodeKind::Leaf,
                tag => return Err(Error::Corrupt(format!("node {id} has unknown tag {tag}"))),
            };
            let count = reader.read_u32()? as usize;
            if count > degree {
                return Err(Error::Corrupt(format!(
                    "node {id} claims {count} branches, degree is {degree}"
                )));
            }

            let mut entries = Vec::with_capacity(count);
            for slot in 0..degree {
                let min = reader.read_f32s(D)?;
                let max = reader.read_f32s(D)?;
                let index = reader.read_u64()?;
                let child = reader.read_u32()?;
                if slot < count {
                    entries.push(Entry {
                        bbox: BoundingBox::new(
                            std::array::from_fn(|d| min[d]),
                            std::array::from_fn(|d| max[d]),
                        ),
                        index,
                        child,
                    });
                }
            }
            nodes.push(Node::new(kind, entries));
        }

        let stride = 2 * D * degree;
        let mut boundary = Vec::with_capacity(leaf * stride);
        let mut ids = Vec::with_capacity(leaf * degree);
        let mut counts = Vec::with_capacity(leaf);
        for _ in 0..leaf {
            boundary.extend(reader.read_f32s(stride)?);
            ids.extend(reader.read_u32s(degree)?);
            counts.push(reader.read_u32()?);
        }
        let leaves = LeafLayer::from_raw(degree, boundary, ids, counts)?;

        let tree = Self::from_parts(degree, nodes, level_node_count, leaves)?;
        log::info!("Done, time = {:.3}ms", recorder.elapsed_ms());
        Ok(tree)
    }

    /// Loads the index of `data` from `config.index_dir`, or builds it and dumps it there when
    /// no index exists yet. Without an index directory the tree is always built.
    pub fn build_or_load<T>(data: &T, config: &Config) -> Result<Self>
    where
        T: DataSet + ?Sized,
    {
        let Some(dir) = &config.index_dir else {
            return Self::build(data, config);
        };

        let path = dir.join(index_name(data.name(), config.degree, D));
        match Self::load(&path, config.degree) {
            Ok(tree) => Ok(tree),
            Err(error) if error.is_recoverable() => {
                log::warn!("{error}, building a new index");
                let tree = Self::build(data, config)?;
                tree.dump(&path)?;
                Ok(tree)
            }
            Err(error) => Err(error),
        }
    }
}
