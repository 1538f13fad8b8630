/// Cut-axis and median selection for one subset.
///
/// Every list is sorted along its own axis, so its first and last ids give
/// that axis' minimum and maximum without a scan, and the median is simply
/// the middle element of the cut-axis list.
use crate::id_list::AxisLists;
use crate::point::{Axis, Point3};
use crate::positions::PositionLookup;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitChoice {
    pub cut_axis: Axis,
    pub median_id: u32,
    pub median: Point3,
    /// Per-axis minimum of the subset.
    pub min: Point3,
    /// Per-axis maximum of the subset.
    pub max: Point3,
}

impl SplitChoice {
    /// Coordinate separating the left subset from the right one.
    pub fn split_value(&self) -> f32 {
        self.median.coord(self.cut_axis)
    }
}

/// Returns `None` for an empty subset.
pub fn analyze(lists: &AxisLists, positions: &dyn PositionLookup) -> Option<SplitChoice> {
    let mut min = Point3::default();
    let mut max = Point3::default();
    let mut cut_axis = Axis::X;
    let mut widest = f32::NEG_INFINITY;

    for axis in Axis::ALL {
        let ids = lists.axis(axis);
        let low = positions.position(*ids.first()?).coord(axis);
        let high = positions.position(*ids.last()?).coord(axis);
        set_coord(&mut min, axis, low);
        set_coord(&mut max, axis, high);

        // Strictly greater keeps the earlier axis on ties.
        let extent = (high - low).abs();
        if extent > widest {
            widest = extent;
            cut_axis = axis;
        }
    }

    let cut_list = lists.axis(cut_axis);
    let median_id = cut_list[cut_list.len() / 2];

    Some(SplitChoice {
        cut_axis,
        median_id,
        median: positions.position(median_id),
        min,
        max,
    })
}

fn set_coord(point: &mut Point3, axis: Axis, value: f32) {
    match axis {
        Axis::X => point.x = value,
        Axis::Y => point.y = value,
        Axis::Z => point.z = value,
    }
}
