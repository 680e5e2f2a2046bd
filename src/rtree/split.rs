use crate::rtree::bounding_box::BoundingBox;
use crate::rtree::dimension_type::DimensionType;
use crate::rtree::node::min_fill;
use arrayvec::ArrayVec;

/// The two halves produced by splitting an overfull node's entries.
pub(crate) struct SplitGroups<T, const N: usize, const M: usize, Child> {
    pub first: ArrayVec<(BoundingBox<T, N>, Child), M>,
    pub second: ArrayVec<(BoundingBox<T, N>, Child), M>,
}

/// Splits `entries` (which holds `M + 1` items, one over capacity) into two
/// groups that each satisfy the minimum-fill invariant.
///
/// This is the linear-axis split: pick the axis with the greatest spread
/// among the entries' centers, sort by minimum coordinate along that axis,
/// then cut the sorted sequence so both halves have at least `m` entries.
/// Ties in the cut point favour an even split.
pub(crate) fn linear_axis_split<T, const N: usize, const M: usize, Child>(
    mut entries: Vec<(BoundingBox<T, N>, Child)>,
) -> SplitGroups<T, N, M, Child>
where
    T: DimensionType,
{
    debug_assert_eq!(entries.len(), M + 1);
    let m = min_fill(M).max(1);

    let axis = greatest_spread_axis::<T, N, Child>(&entries);
    entries.sort_by(|a, b| {
        a.0.dims[axis]
            .start
            .partial_cmp(&b.0.dims[axis].start)
            .expect("coordinates must be totally ordered for splitting")
    });

    let total = entries.len();
    let cut = (total / 2).max(m).min(total - m);

    let mut first = ArrayVec::new();
    let mut second = ArrayVec::new();
    for (i, entry) in entries.into_iter().enumerate() {
        if i < cut {
            first.push(entry);
        } else {
            second.push(entry);
        }
    }

    SplitGroups { first, second }
}

fn greatest_spread_axis<T, const N: usize, Child>(entries: &[(BoundingBox<T, N>, Child)]) -> usize
where
    T: DimensionType,
{
    let mut best_axis = 0;
    let mut best_spread: Option<T> = None;
    for axis in 0..N {
        let mut lo = entries[0].0.dims[axis].start;
        let mut hi = entries[0].0.dims[axis].end;
        for (bb, _) in entries.iter().skip(1) {
            let extent = bb.dims[axis];
            if extent.start < lo {
                lo = extent.start;
            }
            if extent.end > hi {
                hi = extent.end;
            }
        }
        let spread = hi - lo;
        if best_spread.map_or(true, |best| spread > best) {
            best_spread = Some(spread);
            best_axis = axis;
        }
    }
    best_axis
}

#[cfg(test)]
mod test {
    use super::*;

    fn bb(min: [f64; 2], max: [f64; 2]) -> BoundingBox<f64, 2> {
        BoundingBox::new([
            crate::rtree::extent::Extent::new(min[0], max[0]),
            crate::rtree::extent::Extent::new(min[1], max[1]),
        ])
    }

    #[test]
    fn splits_into_two_non_empty_balanced_groups() {
        let entries: Vec<(BoundingBox<f64, 2>, u32)> = vec![
            (bb([0.0, 0.0], [1.0, 1.0]), 0),
            (bb([1.0, 0.0], [2.0, 1.0]), 1),
            (bb([2.0, 0.0], [3.0, 1.0]), 2),
            (bb([3.0, 0.0], [4.0, 1.0]), 3),
            (bb([10.0, 0.0], [11.0, 1.0]), 4),
        ];
        let groups = linear_axis_split::<f64, 2, 4, u32>(entries);
        assert!(groups.first.len() >= min_fill(4));
        assert!(groups.second.len() >= min_fill(4));
        assert_eq!(groups.first.len() + groups.second.len(), 5);
    }

    #[test]
    fn picks_axis_with_greatest_spread() {
        let entries: Vec<(BoundingBox<f64, 2>, u32)> = vec![
            (bb([0.0, 0.0], [0.1, 0.1]), 0),
            (bb([0.2, 100.0], [0.3, 100.1]), 1),
        ];
        let axis = greatest_spread_axis(&entries);
        assert_eq!(axis, 1);
    }
}
