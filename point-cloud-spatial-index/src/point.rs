/// Point and axis primitives shared by every stage.
use constants::file_format::AXIS_NAMES;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate axis. Discriminants match the on-disk axis codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    /// All axes in tie-break priority order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Axis> {
        match code {
            0 => Some(Axis::X),
            1 => Some(Axis::Y),
            2 => Some(Axis::Z),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        AXIS_NAMES[self.index()]
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable coordinate triple.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Coordinate along the given axis.
    pub fn coord(&self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn from_array(values: [f32; 3]) -> Self {
        Self::new(values[0], values[1], values[2])
    }
}

/// A point tagged with its stable id, as carried through sorting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointRecord {
    pub id: u32,
    pub position: Point3,
}

impl PointRecord {
    pub fn new(id: u32, position: Point3) -> Self {
        Self { id, position }
    }

    pub fn key(&self, axis: Axis) -> f32 {
        self.position.coord(axis)
    }

    /// Sort order along an axis: coordinate by IEEE total order, then id.
    /// Ids are unique, so the resulting order is independent of how batches
    /// were split and paired.
    pub fn cmp_on(&self, other: &PointRecord, axis: Axis) -> std::cmp::Ordering {
        self.key(axis)
            .total_cmp(&other.key(axis))
            .then(self.id.cmp(&other.id))
    }
}

/// Word offset of a point inside the position buffer.
pub fn position_word_offset(id: u32) -> u32 {
    id * constants::file_format::FLOATS_PER_POINT
}
