/// Point sources feeding the split phase.
///
/// A source only has to announce how many points it holds and then deliver
/// them in enumeration order; the position in that order becomes the id.
use crate::error::{BuildError, Result};
use crate::point::Point3;
use byteorder::{LittleEndian, ReadBytesExt};
use constants::file_format::POSITION_RECORD_BYTES;
use las::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub trait PointSource {
    /// Number of points the source declares up front.
    fn point_count(&self) -> u64;

    /// Points in enumeration order.
    fn points(&mut self) -> Box<dyn Iterator<Item = Result<Point3>> + '_>;

    /// World position of the point reported as `(0, 0, 0)`. Sources with
    /// large coordinates shift them before narrowing to `f32`.
    fn origin(&self) -> [f64; 3] {
        [0.0; 3]
    }
}

/// LAS/LAZ point cloud read through the `las` crate.
///
/// Georeferenced coordinates are far from zero, where `f32` spacing is
/// coarse (0.5 m at a UTM northing), so every point is reported relative to
/// the minimum corner of the header bounds.
pub struct LasSource {
    reader: Reader,
    point_count: u64,
    origin: [f64; 3],
}

impl LasSource {
    /// Create LAS file reader for point cloud access.
    /// Handles both .las and .laz compressed formats.
    pub fn open(file_path: &Path) -> Result<Self> {
        let file = File::open(file_path)?;
        let buf_reader = BufReader::new(file);
        let reader = Reader::new(buf_reader)?;
        let header = reader.header();
        let point_count = header.number_of_points();

        let min = header.bounds().min;
        let origin = [min.x, min.y, min.z];
        let origin = if point_count > 0 && origin.iter().all(|v| v.is_finite()) {
            origin
        } else {
            [0.0; 3]
        };

        log::info!(
            "LAS/LAZ file {} (version {}.{}): {} points",
            file_path.display(),
            header.version().major,
            header.version().minor,
            point_count
        );
        log::info!(
            "  Offsets: X={}, Y={}, Z={} (origin {:?})",
            header.transforms().x.offset,
            header.transforms().y.offset,
            header.transforms().z.offset,
            origin
        );

        Ok(Self {
            reader,
            point_count,
            origin,
        })
    }
}

impl PointSource for LasSource {
    fn point_count(&self) -> u64 {
        self.point_count
    }

    fn points(&mut self) -> Box<dyn Iterator<Item = Result<Point3>> + '_> {
        let [ox, oy, oz] = self.origin;
        Box::new(self.reader.points().map(move |point| {
            let point = point?;
            Ok(Point3::new(
                (point.x - ox) as f32,
                (point.y - oy) as f32,
                (point.z - oz) as f32,
            ))
        }))
    }

    fn origin(&self) -> [f64; 3] {
        self.origin
    }
}

/// Raw file in position buffer layout (`f32 x, y, z` per point).
pub struct PositionFileSource {
    reader: BufReader<File>,
    point_count: u64,
}

impl PositionFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len % POSITION_RECORD_BYTES != 0 {
            return Err(BuildError::malformed(
                path,
                format!("length {len} is not a multiple of {POSITION_RECORD_BYTES}"),
            ));
        }

        Ok(Self {
            reader: BufReader::new(file),
            point_count: len / POSITION_RECORD_BYTES,
        })
    }
}

impl PointSource for PositionFileSource {
    fn point_count(&self) -> u64 {
        self.point_count
    }

    fn points(&mut self) -> Box<dyn Iterator<Item = Result<Point3>> + '_> {
        let reader = &mut self.reader;
        Box::new((0..self.point_count).map(move |_| {
            let x = reader.read_f32::<LittleEndian>()?;
            let y = reader.read_f32::<LittleEndian>()?;
            let z = reader.read_f32::<LittleEndian>()?;
            Ok(Point3::new(x, y, z))
        }))
    }
}

/// Points already held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    points: Vec<Point3>,
}

impl MemorySource {
    pub fn new(points: Vec<Point3>) -> Self {
        Self { points }
    }
}

impl From<Vec<Point3>> for MemorySource {
    fn from(points: Vec<Point3>) -> Self {
        Self::new(points)
    }
}

impl PointSource for MemorySource {
    fn point_count(&self) -> u64 {
        self.points.len() as u64
    }

    fn points(&mut self) -> Box<dyn Iterator<Item = Result<Point3>> + '_> {
        Box::new(self.points.iter().copied().map(Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use las::{Transform, Vector, Writer};
    use std::io::Write;

    fn write_las(path: &Path, points: &[[f64; 3]]) {
        let mut builder = las::Builder::from((1, 2));
        let transform = |offset| Transform {
            scale: 0.001,
            offset,
        };
        builder.transforms = Vector {
            x: transform(500_000.0),
            y: transform(5_800_000.0),
            z: transform(0.0),
        };
        let mut writer = Writer::from_path(path, builder.into_header().unwrap()).unwrap();
        for &[x, y, z] in points {
            writer
                .write_point(las::Point {
                    x,
                    y,
                    z,
                    ..Default::default()
                })
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn las_points_are_reported_relative_to_the_bounds_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.las");
        // One centimetre apart: indistinguishable as raw f32 at these values.
        let world: Vec<[f64; 3]> = (0..5)
            .map(|i| {
                let step = i as f64 * 0.01;
                [500_123.25 + step, 5_812_345.5 + step, 120.0 + step]
            })
            .collect();
        write_las(&path, &world);

        let mut source = LasSource::open(&path).unwrap();
        assert_eq!(source.point_count(), 5);
        let origin = source.origin();
        assert!((origin[0] - 500_123.25).abs() < 1e-6);
        assert!((origin[1] - 5_812_345.5).abs() < 1e-6);
        assert!((origin[2] - 120.0).abs() < 1e-6);

        let points: Vec<Point3> = source.points().collect::<Result<_>>().unwrap();
        for (i, point) in points.iter().enumerate() {
            let expected = i as f32 * 0.01;
            for axis in crate::point::Axis::ALL {
                assert!((point.coord(axis) - expected).abs() < 1e-4, "{i} {axis}");
            }
        }
        assert!(points.windows(2).all(|pair| pair[0].y < pair[1].y));
    }

    #[test]
    fn position_file_source_reads_triples_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud_DATA.bin");
        let mut file = File::create(&path).unwrap();
        for value in [1.0f32, 2.0, 3.0, -4.0, 5.5, 6.25] {
            file.write_f32::<LittleEndian>(value).unwrap();
        }
        file.flush().unwrap();

        let mut source = PositionFileSource::open(&path).unwrap();
        assert_eq!(source.point_count(), 2);
        let points: Vec<Point3> = source.points().collect::<Result<_>>().unwrap();
        assert_eq!(
            points,
            vec![Point3::new(1.0, 2.0, 3.0), Point3::new(-4.0, 5.5, 6.25)]
        );
    }

    #[test]
    fn position_file_source_rejects_partial_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken_DATA.bin");
        std::fs::write(&path, [0u8; 13]).unwrap();

        assert!(matches!(
            PositionFileSource::open(&path),
            Err(BuildError::Malformed { .. })
        ));
    }
}
