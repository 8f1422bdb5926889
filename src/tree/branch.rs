use crate::{dataset::DataSet, tree::BoundingBox, Error, Result};

/// Transient build record: a box, its locality key and what it points to.
///
/// For a leaf-level branch `child` is the position of the source point in its dataset, for an
/// upper-level branch it is the arena index of the node the branch describes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Branch<const D: usize> {
    /// Box of the referenced point or node.
    pub bbox: BoundingBox<[f32; D]>,
    /// Locality key, the only sort criterion.
    pub key: u64,
    /// Referenced point or node.
    pub child: u32,
}

impl<const D: usize> Branch<D> {
    /// Creates a new [`Branch`] with a zero key.
    #[inline]
    pub const fn new(bbox: BoundingBox<[f32; D]>, child: u32) -> Self {
        Self { bbox, key: 0, child }
    }
}

/// Creates one branch per point of `data`, each seeded with the degenerate box of its point.
pub fn collect_branches<const D: usize, T>(data: &T) -> Result<Vec<Branch<D>>>
where
    T: DataSet + ?Sized,
{
    if data.dims() != D {
        return Err(Error::DimensionMismatch {
            expected: D,
            found: data.dims(),
        });
    }

    let coordinates = data.coordinates();
    if coordinates.len() % D != 0 {
        return Err(Error::DegenerateBuild(format!(
            "dataset {} holds {} coordinates, not a whole number of {D}-dimensional points",
            data.name(),
            coordinates.len()
        )));
    }
    if coordinates.is_empty() {
        return Err(Error::DegenerateBuild(format!(
            "dataset {} holds no point",
            data.name()
        )));
    }
    if coordinates.len() / D > u32::MAX as usize {
        return Err(Error::DegenerateBuild(format!(
            "dataset {} holds more points than can be referenced",
            data.name()
        )));
    }

    Ok(coordinates
        .chunks_exact(D)
        .enumerate()
        .map(|(i, point)| {
            let position = std::array::from_fn(|d| point[d]);
            Branch::new(BoundingBox::point(position), i as u32)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PointSet;

    #[test]
    fn one_branch_per_point() {
        let data = PointSet::from_points("line", &[[0.0, 0.0], [1.0, 2.0], [3.0, 4.0]]);
        let branches = collect_branches::<2, _>(&data).unwrap();

        assert_eq!(branches.len(), 3);
        for (i, branch) in branches.iter().enumerate() {
            assert_eq!(branch.child, i as u32);
            assert_eq!(branch.bbox.min, branch.bbox.max);
        }
        assert_eq!(branches[1].bbox.min, [1.0, 2.0]);
    }

    #[test]
    fn dimension_mismatch_aborts() {
        let data = PointSet::from_points("flat", &[[0.0, 0.0]]);
        assert!(matches!(
            collect_branches::<3, _>(&data),
            Err(Error::DimensionMismatch {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn ragged_coordinates_abort() {
        let data = PointSet::new("ragged", 3, vec![0.0, 1.0, 2.0, 3.0]);
        match collect_branches::<3, _>(&data) {
            Err(Error::DegenerateBuild(message)) => assert!(message.contains("4 coordinates")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn empty_dataset_aborts() {
        let data = PointSet::new("none", 3, Vec::new());
        assert!(matches!(
            collect_branches::<3, _>(&data),
            Err(Error::DegenerateBuild(_))
        ));
    }
}
