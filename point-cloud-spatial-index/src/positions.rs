/// Position buffer: `f32 x, y, z` per point in id order, written once during
/// the split phase and only read afterwards.
use crate::error::{BuildError, Result};
use crate::point::Point3;
use byteorder::{LittleEndian, WriteBytesExt};
use constants::file_format::POSITION_RECORD_BYTES;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Random access to point coordinates by id.
///
/// Implementations are read-only and shared freely between threads.
pub trait PositionLookup: Sync {
    fn len(&self) -> u64;

    fn position(&self, id: u32) -> Point3;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sequential writer producing the position buffer.
pub struct PositionBufferWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl PositionBufferWriter {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(File::create(path)?),
            written: 0,
        })
    }

    pub fn push(&mut self, point: Point3) -> Result<()> {
        self.writer.write_f32::<LittleEndian>(point.x)?;
        self.writer.write_f32::<LittleEndian>(point.y)?;
        self.writer.write_f32::<LittleEndian>(point.z)?;
        self.written += 1;
        Ok(())
    }

    /// Flushes the file and returns its path with the number of points written.
    pub fn finish(mut self) -> Result<(PathBuf, u64)> {
        self.writer.flush()?;
        Ok((self.path, self.written))
    }
}

/// Position buffer mapped read-only from disk.
pub struct MappedPositions {
    // Empty files are not mapped.
    map: Option<Mmap>,
    count: u64,
}

impl MappedPositions {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len % POSITION_RECORD_BYTES != 0 {
            return Err(BuildError::malformed(
                path,
                format!("length {len} is not a multiple of {POSITION_RECORD_BYTES}"),
            ));
        }

        let map = if len == 0 {
            None
        } else {
            // The buffer is write-once; nothing mutates it while mapped.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            map,
            count: len / POSITION_RECORD_BYTES,
        })
    }

    fn records(&self) -> &[[f32; 3]] {
        match &self.map {
            Some(map) => bytemuck::cast_slice(&map[..]),
            None => &[],
        }
    }

    /// Copies every record into memory.
    pub fn load(&self) -> InMemoryPositions {
        InMemoryPositions::new(self.records().to_vec())
    }
}

impl PositionLookup for MappedPositions {
    fn len(&self) -> u64 {
        self.count
    }

    fn position(&self, id: u32) -> Point3 {
        Point3::from_array(self.records()[id as usize])
    }
}

/// Position buffer fully loaded into memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPositions {
    records: Vec<[f32; 3]>,
}

impl InMemoryPositions {
    pub fn new(records: Vec<[f32; 3]>) -> Self {
        Self { records }
    }

    pub fn from_points(points: &[Point3]) -> Self {
        Self::new(points.iter().map(|p| p.to_array()).collect())
    }
}

impl PositionLookup for InMemoryPositions {
    fn len(&self) -> u64 {
        self.records.len() as u64
    }

    fn position(&self, id: u32) -> Point3 {
        Point3::from_array(self.records[id as usize])
    }
}
