use std::ops::{Neg, Sub};

/// Trait for the element `infinity`.
pub trait Infinity {
    /// `infinity` (∞) value of the type.
    fn infinity() -> Self;
}

/// Trait to compute the minimum and maximum of a number.
pub trait MinMax {
    /// Returns the minimum between two numbers.
    fn min(self, rhs: Self) -> Self;

    /// Returns the maximum between two numbers.
    fn max(self, rhs: Self) -> Self;
}

/// Trait to compute the midpoint of two numbers.
pub trait MidPoint {
    /// Returns the middle point of `self` and `rhs`.
    fn midpoint(self, rhs: Self) -> Self;
}

impl Infinity for f32 {
    #[inline]
    fn infinity() -> Self {
        f32::INFINITY
    }
}

impl MinMax for f32 {
    #[inline]
    fn min(self, rhs: Self) -> Self {
        f32::min(self, rhs)
    }

    #[inline]
    fn max(self, rhs: Self) -> Self {
        f32::max(self, rhs)
    }
}

impl MidPoint for f32 {
    #[inline]
    fn midpoint(self, rhs: Self) -> Self {
        (self + rhs) * 0.5
    }
}

/// An axis-aligned bounding box using arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox<A> {
    /// Minimum corner of the box.
    pub min: A,
    /// Maximum corner of the box.
    pub max: A,
}

impl<A> BoundingBox<A> {
    /// Creates a new [`BoundingBox`] with the given min and max values.
    #[inline]
    pub const fn new(min: A, max: A) -> Self {
        Self { min, max }
    }
}

impl<const D: usize, S> Default for BoundingBox<[S; D]>
where
    S: Neg<Output = S> + Infinity + Copy,
{
    /// The empty box: extending it with any position yields that position.
    #[inline]
    fn default() -> Self {
        Self::new([S::infinity(); D], [-S::infinity(); D])
    }
}

impl<const D: usize, S: Copy> BoundingBox<[S; D]> {
    /// Creates a degenerate [`BoundingBox`] containing a single position.
    #[inline]
    pub const fn point(position: [S; D]) -> Self {
        Self::new(position, position)
    }

    /// Extends the [`BoundingBox`] so that it contains `other`.
    #[inline]
    pub fn union(&mut self, other: &Self)
    where
        S: MinMax,
    {
        for i in 0..D {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    /// Creates the smallest [`BoundingBox`] enclosing every given box.
    #[inline]
    pub fn enclosing<'a, I>(boxes: I) -> Self
    where
        Self: Default + 'a,
        S: MinMax,
        I: IntoIterator<Item = &'a Self>,
    {
        let mut result = Self::default();
        for bbox in boxes {
            result.union(bbox);
        }
        result
    }

    /// Returns `true` if the two boxes share at least one point. Touching faces overlap.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool
    where
        S: PartialOrd,
    {
        (0..D).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    /// Returns the center of the [`BoundingBox`].
    #[inline]
    pub fn center(&self) -> [S; D]
    where
        S: MidPoint,
    {
        std::array::from_fn(|i| self.min[i].midpoint(self.max[i]))
    }

    /// Returns the size of the [`BoundingBox`].
    #[inline]
    pub fn size(&self) -> [S; D]
    where
        S: Sub<Output = S>,
    {
        std::array::from_fn(|i| self.max[i] - self.min[i])
    }
}
