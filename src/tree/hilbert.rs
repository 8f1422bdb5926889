use crate::{
    tree::{BoundingBox, Branch},
    Error, Result,
};

/// Maximum number of bits used per axis. Coordinates are quantized on a `2^bits` grid.
pub const MAX_AXIS_BITS: u32 = 16;

/// Number of bits per axis used for a `D`-dimensional key so that the key fits in a `u64`.
#[inline]
pub const fn axis_bits(dims: usize) -> u32 {
    let bits = 64 / dims as u32;
    if bits > MAX_AXIS_BITS {
        MAX_AXIS_BITS
    } else {
        bits
    }
}

/// Hilbert index of a cell on a `2^bits` grid in `D` dimensions.
///
/// Uses Skilling's transpose formulation ("Programming the Hilbert curve", 2004): the axes are
/// converted in place to the transposed index, whose bits are then interleaved from the most
/// significant bit of the first axis down.
pub fn hilbert_key<const D: usize>(mut x: [u32; D], bits: u32) -> u64 {
    debug_assert!(bits >= 1 && bits as usize * D <= 64);

    let m = 1u32 << (bits - 1);

    // Inverse undo.
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..D {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // Gray encode.
    for i in 1..D {
        x[i] ^= x[i - 1];
    }
    let mut t = 0;
    let mut q = m;
    while q > 1 {
        if x[D - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for axis in x.iter_mut() {
        *axis ^= t;
    }

    let mut key = 0u64;
    for b in (0..bits).rev() {
        for axis in x {
            key = (key << 1) | u64::from((axis >> b) & 1);
        }
    }
    key
}

/// Assigns every branch the Hilbert key of its box center, quantized against the box enclosing
/// all branches.
pub fn assign_hilbert_keys<const D: usize>(branches: &mut [Branch<D>]) -> Result<()> {
    if D == 0 || D > 64 {
        return Err(Error::InvalidConfig(format!(
            "Hilbert keys support 1 to 64 dimensions, got {D}"
        )));
    }

    let bits = axis_bits(D);
    let cells = ((1u64 << bits) - 1) as f32;
    let bounds = BoundingBox::enclosing(branches.iter().map(|branch| &branch.bbox));
    let extent = bounds.size();

    for branch in branches.iter_mut() {
        let center = branch.bbox.center();
        let cell: [u32; D] = std::array::from_fn(|d| {
            if extent[d] > 0.0 {
                (((center[d] - bounds.min[d]) / extent[d]) * cells).clamp(0.0, cells) as u32
            } else {
                0
            }
        });
        branch.key = hilbert_key(cell, bits);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk<const D: usize>(bits: u32) -> Vec<[u32; D]> {
        let side = 1u32 << bits;
        let count = (side as usize).pow(D as u32);
        let mut cells = vec![[0u32; D]; count];

        for index in 0..count {
            let mut rest = index;
            let cell: [u32; D] = std::array::from_fn(|_| {
                let c = (rest % side as usize) as u32;
                rest /= side as usize;
                c
            });
            let key = hilbert_key(cell, bits) as usize;
            assert!(key < count, "key {key} out of range");
            cells[key] = cell;
        }
        cells
    }

    fn assert_continuous<const D: usize>(bits: u32) {
        let cells = walk::<D>(bits);
        let mut seen = std::collections::HashSet::new();
        for cell in &cells {
            assert!(seen.insert(*cell), "cell {cell:?} mapped twice");
        }
        for pair in cells.windows(2) {
            let distance: u32 = (0..D).map(|d| pair[0][d].abs_diff(pair[1][d])).sum();
            assert_eq!(distance, 1, "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn curve_is_continuous_2d() {
        assert_continuous::<2>(3);
    }

    #[test]
    fn curve_is_continuous_3d() {
        assert_continuous::<3>(2);
    }

    #[test]
    fn bits_fit_in_key() {
        assert_eq!(axis_bits(2), MAX_AXIS_BITS);
        assert_eq!(axis_bits(3), MAX_AXIS_BITS);
        assert_eq!(axis_bits(5), 12);
        assert_eq!(axis_bits(64), 1);
    }

    #[test]
    fn nearby_boxes_get_nearby_keys() {
        let mut branches: Vec<Branch<2>> = [[0.0, 0.0], [0.1, 0.0], [10.0, 10.0], [0.0, 0.1]]
            .into_iter()
            .enumerate()
            .map(|(i, p)| Branch::new(BoundingBox::point(p), i as u32))
            .collect();
        assign_hilbert_keys(&mut branches).unwrap();

        let far = branches[2].key;
        for i in [0, 1, 3] {
            for j in [0, 1, 3] {
                assert!(branches[i].key.abs_diff(branches[j].key) < far.abs_diff(branches[i].key));
            }
        }
    }
}
