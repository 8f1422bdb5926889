use crate::tree::BoundingBox;

/// Provider of the points indexed by a [`HybridTree`](crate::HybridTree).
///
/// Coordinates are stored row-major: the `i`-th point occupies
/// `coordinates()[i * dims()..(i + 1) * dims()]`.
pub trait DataSet {
    /// Stable identity of the dataset, used to derive the name of its index file.
    fn name(&self) -> &str;

    /// Number of coordinates per point.
    fn dims(&self) -> usize;

    /// Flat coordinates of every point.
    fn coordinates(&self) -> &[f32];

    /// Number of points in the dataset.
    #[inline]
    fn len(&self) -> usize {
        match self.dims() {
            0 => 0,
            dims => self.coordinates().len() / dims,
        }
    }

    /// Returns `true` if the dataset holds no point.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`DataSet`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointSet {
    name: String,
    dims: usize,
    coordinates: Vec<f32>,
}

impl PointSet {
    /// Creates a [`PointSet`] from flat row-major coordinates.
    #[inline]
    pub fn new(name: impl Into<String>, dims: usize, coordinates: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            dims,
            coordinates,
        }
    }

    /// Creates a [`PointSet`] from fixed size points.
    pub fn from_points<const D: usize>(name: impl Into<String>, points: &[[f32; D]]) -> Self {
        Self::new(name, D, points.iter().flatten().copied().collect())
    }
}

impl DataSet for PointSet {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn dims(&self) -> usize {
        self.dims
    }

    #[inline]
    fn coordinates(&self) -> &[f32] {
        &self.coordinates
    }
}

/// Batch of query boxes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySet<const D: usize> {
    boxes: Vec<BoundingBox<[f32; D]>>,
}

impl<const D: usize> QuerySet<D> {
    /// Creates a [`QuerySet`] from the given boxes.
    #[inline]
    pub fn new(boxes: Vec<BoundingBox<[f32; D]>>) -> Self {
        Self { boxes }
    }

    /// Queries of this batch.
    #[inline]
    pub fn boxes(&self) -> &[BoundingBox<[f32; D]>] {
        &self.boxes
    }

    /// Number of queries.
    #[inline]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// Returns `true` if the batch holds no query.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

impl<const D: usize> FromIterator<BoundingBox<[f32; D]>> for QuerySet<D> {
    #[inline]
    fn from_iter<I: IntoIterator<Item = BoundingBox<[f32; D]>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
