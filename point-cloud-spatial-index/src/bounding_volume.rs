/// Bounding volume metadata written in front of every internal node.
use crate::error::{BuildError, Result};
use crate::point::{Axis, Point3};
use constants::file_format::{
    KIND_AABB, KIND_NONE, KIND_SPHERE, KIND_SPLIT_PLANE, LEAF_SENTINEL_BITS, SPLIT_PLANE_X_WORD,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of bounding volume carried by every node of one tree, selected once
/// per build and stored in the tree header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
#[value(rename_all = "UPPER")]
pub enum BoundingVolumeKind {
    Sphere,
    Aabb,
    None,
    SplitPlane,
}

impl BoundingVolumeKind {
    pub fn code(self) -> u32 {
        match self {
            BoundingVolumeKind::Sphere => KIND_SPHERE,
            BoundingVolumeKind::Aabb => KIND_AABB,
            BoundingVolumeKind::None => KIND_NONE,
            BoundingVolumeKind::SplitPlane => KIND_SPLIT_PLANE,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            KIND_SPHERE => Some(BoundingVolumeKind::Sphere),
            KIND_AABB => Some(BoundingVolumeKind::Aabb),
            KIND_NONE => Some(BoundingVolumeKind::None),
            KIND_SPLIT_PLANE => Some(BoundingVolumeKind::SplitPlane),
            _ => None,
        }
    }

    /// Name used in output file names.
    pub fn name(self) -> &'static str {
        match self {
            BoundingVolumeKind::Sphere => "SPHERE",
            BoundingVolumeKind::Aabb => "AABB",
            BoundingVolumeKind::None => "NONE",
            BoundingVolumeKind::SplitPlane => "SPLITPLANE",
        }
    }

    /// Words the descriptor occupies in front of each internal node.
    pub fn word_count(self) -> u64 {
        match self {
            BoundingVolumeKind::Sphere => 1,
            BoundingVolumeKind::Aabb => 6,
            BoundingVolumeKind::None => 0,
            BoundingVolumeKind::SplitPlane => 1,
        }
    }

    /// Kinds a tree can be built with. `None` leaves nothing to tell an
    /// internal node apart from a leaf, so it is only ever decoded.
    pub fn ensure_buildable(self) -> Result<()> {
        match self {
            BoundingVolumeKind::None => Err(unbuildable(self)),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for BoundingVolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn unbuildable(kind: BoundingVolumeKind) -> BuildError {
    BuildError::config(format!(
        "bounding volume {kind} cannot be built: internal nodes need a non-zero first word"
    ))
}

/// Per-node descriptor for one of the buildable kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    Sphere { radius: f32 },
    Aabb { min: Point3, size: Point3 },
    SplitPlane { axis: Axis },
}

impl BoundingVolume {
    /// Builds the descriptor from the node's median point and the per-axis
    /// extremes of its subset.
    pub fn compute(
        kind: BoundingVolumeKind,
        center: Point3,
        min: Point3,
        max: Point3,
        cut_axis: Axis,
    ) -> Result<Self> {
        match kind {
            BoundingVolumeKind::Sphere => {
                let radius = Axis::ALL
                    .iter()
                    .flat_map(|&axis| {
                        [
                            (center.coord(axis) - min.coord(axis)).abs(),
                            (center.coord(axis) - max.coord(axis)).abs(),
                        ]
                    })
                    .fold(0.0f32, f32::max);
                Ok(BoundingVolume::Sphere { radius })
            }
            BoundingVolumeKind::Aabb => Ok(BoundingVolume::Aabb {
                min,
                size: Point3::new(
                    (max.x - min.x).abs(),
                    (max.y - min.y).abs(),
                    (max.z - min.z).abs(),
                ),
            }),
            BoundingVolumeKind::SplitPlane => Ok(BoundingVolume::SplitPlane { axis: cut_axis }),
            BoundingVolumeKind::None => Err(unbuildable(kind)),
        }
    }

    pub fn kind(&self) -> BoundingVolumeKind {
        match self {
            BoundingVolume::Sphere { .. } => BoundingVolumeKind::Sphere,
            BoundingVolume::Aabb { .. } => BoundingVolumeKind::Aabb,
            BoundingVolume::SplitPlane { .. } => BoundingVolumeKind::SplitPlane,
        }
    }

    /// Words as written to disk. The first word never has the leaf sentinel
    /// bits: a zero radius becomes the smallest positive float, a `+0.0`
    /// minimum x becomes `-0.0` and an X split plane is written as
    /// [`SPLIT_PLANE_X_WORD`]. Every first word is also greater than zero
    /// when read as a float, except the `-0.0` AABB case.
    pub fn to_words(&self) -> Vec<u32> {
        match *self {
            BoundingVolume::Sphere { radius } => {
                let radius = if radius.to_bits() == LEAF_SENTINEL_BITS {
                    f32::MIN_POSITIVE
                } else {
                    radius
                };
                vec![radius.to_bits()]
            }
            BoundingVolume::Aabb { min, size } => {
                let min_x = if min.x.to_bits() == LEAF_SENTINEL_BITS {
                    -0.0f32
                } else {
                    min.x
                };
                [min_x, min.y, min.z, size.x, size.y, size.z]
                    .iter()
                    .map(|v| v.to_bits())
                    .collect()
            }
            BoundingVolume::SplitPlane { axis: Axis::X } => vec![SPLIT_PLANE_X_WORD],
            BoundingVolume::SplitPlane { axis } => vec![axis.code()],
        }
    }

    /// Decodes a descriptor of `kind` from its on-disk words.
    pub fn from_words(kind: BoundingVolumeKind, words: &[u32]) -> Option<Self> {
        let float = |i: usize| words.get(i).map(|w| f32::from_bits(*w));
        match kind {
            BoundingVolumeKind::Sphere => Some(BoundingVolume::Sphere { radius: float(0)? }),
            BoundingVolumeKind::Aabb => Some(BoundingVolume::Aabb {
                min: Point3::new(float(0)?, float(1)?, float(2)?),
                size: Point3::new(float(3)?, float(4)?, float(5)?),
            }),
            BoundingVolumeKind::SplitPlane => {
                let axis = match *words.first()? {
                    SPLIT_PLANE_X_WORD => Axis::X,
                    LEAF_SENTINEL_BITS => return None,
                    code => Axis::from_code(code)?,
                };
                Some(BoundingVolume::SplitPlane { axis })
            }
            BoundingVolumeKind::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_radius_is_largest_distance_to_any_extreme() {
        let volume = BoundingVolume::compute(
            BoundingVolumeKind::Sphere,
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, -3.0, 0.5),
            Point3::new(2.0, 1.5, 1.0),
            Axis::Y,
        )
        .unwrap();
        assert_eq!(volume, BoundingVolume::Sphere { radius: 4.0 });
    }

    #[test]
    fn aabb_is_min_corner_plus_extent() {
        let volume = BoundingVolume::compute(
            BoundingVolumeKind::Aabb,
            Point3::default(),
            Point3::new(-1.0, 2.0, 3.0),
            Point3::new(1.0, 4.0, 3.5),
            Axis::X,
        )
        .unwrap();
        assert_eq!(
            volume,
            BoundingVolume::Aabb {
                min: Point3::new(-1.0, 2.0, 3.0),
                size: Point3::new(2.0, 2.0, 0.5),
            }
        );
        assert_eq!(volume.to_words().len(), 6);
    }

    #[test]
    fn first_word_never_looks_like_a_leaf() {
        let degenerate = [
            BoundingVolume::Sphere { radius: 0.0 },
            BoundingVolume::Aabb {
                min: Point3::new(0.0, 1.0, 1.0),
                size: Point3::default(),
            },
            BoundingVolume::SplitPlane { axis: Axis::X },
        ];
        for volume in degenerate {
            assert_ne!(volume.to_words()[0], LEAF_SENTINEL_BITS, "{volume:?}");
        }
    }

    #[test]
    fn split_plane_words_decode_to_axis() {
        for axis in Axis::ALL {
            let words = BoundingVolume::SplitPlane { axis }.to_words();
            assert_eq!(
                BoundingVolume::from_words(BoundingVolumeKind::SplitPlane, &words),
                Some(BoundingVolume::SplitPlane { axis })
            );
        }
        assert_eq!(
            BoundingVolume::from_words(BoundingVolumeKind::SplitPlane, &[0]),
            None
        );
    }

    #[test]
    fn split_planes_write_plain_codes_except_for_x() {
        let word = |axis| BoundingVolume::SplitPlane { axis }.to_words()[0];
        assert_eq!(word(Axis::X), SPLIT_PLANE_X_WORD);
        assert_eq!(word(Axis::Y), 1);
        assert_eq!(word(Axis::Z), 2);

        // Readers that tell nodes apart with `first word as f32 > 0`.
        for axis in Axis::ALL {
            assert!(f32::from_bits(word(axis)) > 0.0, "{axis}");
        }
        let radius = BoundingVolume::Sphere { radius: 0.0 }.to_words()[0];
        assert!(f32::from_bits(radius) > 0.0);
    }

    #[test]
    fn none_is_not_buildable() {
        assert!(BoundingVolumeKind::None.ensure_buildable().is_err());
        assert!(
            BoundingVolume::compute(
                BoundingVolumeKind::None,
                Point3::default(),
                Point3::default(),
                Point3::default(),
                Axis::X,
            )
            .is_err()
        );
    }

    #[test]
    fn kind_codes_match_header_values() {
        assert_eq!(BoundingVolumeKind::Sphere.code(), 0);
        assert_eq!(BoundingVolumeKind::Aabb.code(), 1);
        assert_eq!(BoundingVolumeKind::None.code(), 2);
        assert_eq!(BoundingVolumeKind::SplitPlane.code(), 3);
        assert_eq!(BoundingVolumeKind::from_code(4), None);
    }
}
