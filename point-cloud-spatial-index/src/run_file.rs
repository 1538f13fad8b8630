/// On-disk codecs for sort runs and axis index streams.
///
/// Run file: `u32 count`, then `count` records of `u32 id, f32 x, f32 y,
/// f32 z`. The key for axis `a` therefore sits at byte `4 + 4a` of every
/// record. Axis index stream: `u32 count`, then `count` ids.
use crate::error::{BuildError, Result};
use crate::point::{Axis, Point3, PointRecord};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use constants::file_format::{COUNT_HEADER_BYTES, RUN_RECORD_BYTES, STREAM_RECORD_BYTES};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A sorted run on disk awaiting merge. Owned by exactly one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFile {
    pub path: PathBuf,
    pub axis: Axis,
    pub count: u32,
}

/// Destination of a merge: either another run or a terminal axis stream.
pub trait RecordSink {
    fn push(&mut self, record: &PointRecord) -> Result<()>;
}

/// Writes full point records into a run file.
pub struct RunFileWriter {
    path: PathBuf,
    axis: Axis,
    writer: BufWriter<File>,
    expected: u32,
    written: u32,
}

impl RunFileWriter {
    pub fn create(path: &Path, axis: Axis, count: u32) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_u32::<LittleEndian>(count)?;
        Ok(Self {
            path: path.to_path_buf(),
            axis,
            writer,
            expected: count,
            written: 0,
        })
    }

    pub fn finish(mut self) -> Result<RunFile> {
        if self.written != self.expected {
            return Err(BuildError::counts(
                self.path.display().to_string(),
                self.expected as u64,
                self.written as u64,
            ));
        }
        self.writer.flush()?;
        Ok(RunFile {
            path: self.path,
            axis: self.axis,
            count: self.written,
        })
    }
}

impl RecordSink for RunFileWriter {
    fn push(&mut self, record: &PointRecord) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(record.id)?;
        self.writer.write_f32::<LittleEndian>(record.position.x)?;
        self.writer.write_f32::<LittleEndian>(record.position.y)?;
        self.writer.write_f32::<LittleEndian>(record.position.z)?;
        self.written += 1;
        Ok(())
    }
}

/// Writes a whole sorted batch as one run file.
pub fn write_run(path: &Path, axis: Axis, records: &[PointRecord]) -> Result<RunFile> {
    let count = u32::try_from(records.len())
        .map_err(|_| BuildError::config("run batch exceeds u32 records"))?;
    let mut writer = RunFileWriter::create(path, axis, count)?;
    for record in records {
        writer.push(record)?;
    }
    writer.finish()
}

/// Streaming reader over a run file; never holds more than one record.
pub struct RunReader {
    reader: BufReader<File>,
    count: u32,
    remaining: u32,
}

impl RunReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let count = reader.read_u32::<LittleEndian>()?;

        let expected_len = COUNT_HEADER_BYTES + count as u64 * RUN_RECORD_BYTES;
        if len != expected_len {
            return Err(BuildError::malformed(
                path,
                format!("run declares {count} records but is {len} bytes"),
            ));
        }

        Ok(Self {
            reader,
            count,
            remaining: count,
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn next_record(&mut self) -> Result<Option<PointRecord>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let id = self.reader.read_u32::<LittleEndian>()?;
        let x = self.reader.read_f32::<LittleEndian>()?;
        let y = self.reader.read_f32::<LittleEndian>()?;
        let z = self.reader.read_f32::<LittleEndian>()?;
        Ok(Some(PointRecord::new(id, Point3::new(x, y, z))))
    }
}

/// Writes the id-only terminal stream for one axis.
pub struct AxisStreamWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    expected: u32,
    written: u32,
}

impl AxisStreamWriter {
    pub fn create(path: &Path, count: u32) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_u32::<LittleEndian>(count)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            expected: count,
            written: 0,
        })
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        if self.written != self.expected {
            return Err(BuildError::counts(
                self.path.display().to_string(),
                self.expected as u64,
                self.written as u64,
            ));
        }
        self.writer.flush()?;
        Ok(self.path)
    }
}

impl RecordSink for AxisStreamWriter {
    fn push(&mut self, record: &PointRecord) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(record.id)?;
        self.written += 1;
        Ok(())
    }
}

/// Reads the element count stored at the head of an axis stream and checks
/// the file length against it.
pub fn read_stream_count(path: &Path) -> Result<u32> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    let count = BufReader::new(file).read_u32::<LittleEndian>()?;

    let expected_len = COUNT_HEADER_BYTES + count as u64 * STREAM_RECORD_BYTES;
    if len != expected_len {
        return Err(BuildError::malformed(
            path,
            format!("stream declares {count} ids but is {len} bytes"),
        ));
    }
    Ok(count)
}

/// Loads every id of an axis stream into memory.
pub fn read_axis_stream(path: &Path) -> Result<Vec<u32>> {
    let count = read_stream_count(path)?;
    let mut reader = BufReader::new(File::open(path)?);
    reader.read_u32::<LittleEndian>()?;

    let mut ids = vec![0u32; count as usize];
    reader.read_u32_into::<LittleEndian>(&mut ids)?;
    Ok(ids)
}
