/// Splits a subset's three sorted id lists around the median.
use crate::analyzer::SplitChoice;
use crate::error::Result;
use crate::id_list::{AxisLists, IdListBuilder};
use crate::point::Axis;
use crate::positions::PositionLookup;

/// Filters every list front to back into the two children. Ids with a
/// cut-axis coordinate below the split value go left, everything else except
/// the median goes right. Filtering keeps each list in its parent order,
/// so the children are already sorted along every axis.
pub fn partition(
    lists: &AxisLists,
    choice: &SplitChoice,
    positions: &dyn PositionLookup,
    mut left: [IdListBuilder; 3],
    mut right: [IdListBuilder; 3],
) -> Result<(AxisLists, AxisLists)> {
    let split = choice.split_value();

    for axis in Axis::ALL {
        let (to_left, to_right) = (&mut left[axis.index()], &mut right[axis.index()]);
        for &id in lists.axis(axis) {
            if positions.position(id).coord(choice.cut_axis) < split {
                to_left.push(id)?;
            } else if id != choice.median_id {
                to_right.push(id)?;
            }
        }
    }

    Ok((finish(left)?, finish(right)?))
}

fn finish(builders: [IdListBuilder; 3]) -> Result<AxisLists> {
    let [x, y, z] = builders;
    Ok(AxisLists::new(x.finish()?, y.finish()?, z.finish()?))
}
