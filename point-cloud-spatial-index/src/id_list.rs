/// Id lists for tree subsets, kept either in memory or in memory-mapped
/// files.
///
/// Both kinds are appended to once through an [`IdListBuilder`] and then
/// read as a plain `&[u32]`. A disk-backed list owns its file and deletes it
/// when dropped, so a subset's storage disappears as soon as the subset
/// itself is no longer needed.
use crate::error::{BuildError, Result};
use crate::point::Axis;
use byteorder::{LittleEndian, WriteBytesExt};
use constants::file_format::{COUNT_HEADER_BYTES, STREAM_RECORD_BYTES};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Longest subset path encoded into a file name before falling back to a
/// serial number.
const MAX_SUBSET_NAME_LEN: usize = 128;

/// Ids stored in a mapped file, starting `offset` bytes into it.
pub struct MappedIds {
    map: Option<Mmap>,
    offset: usize,
    len: usize,
    path: PathBuf,
    temporary: bool,
}

impl MappedIds {
    /// Maps a terminal axis stream (skipping its count header). The stream is
    /// a persisted artifact and is never deleted.
    pub fn open_stream(path: &Path) -> Result<Self> {
        let count = crate::run_file::read_stream_count(path)? as usize;
        Self::map_file(path, COUNT_HEADER_BYTES as usize, count, false)
    }

    fn map_file(path: &Path, offset: usize, len: usize, temporary: bool) -> Result<Self> {
        let map = if len == 0 {
            None
        } else {
            let file = File::open(path)?;
            // Subset files are complete before they are mapped and never
            // written again.
            Some(unsafe { Mmap::map(&file)? })
        };

        if let Some(map) = &map {
            let needed = offset + len * STREAM_RECORD_BYTES as usize;
            if map.len() < needed {
                return Err(BuildError::malformed(
                    path,
                    format!("expected at least {needed} bytes, found {}", map.len()),
                ));
            }
        }

        Ok(Self {
            map,
            offset,
            len,
            path: path.to_path_buf(),
            temporary,
        })
    }

    pub fn as_slice(&self) -> &[u32] {
        match &self.map {
            Some(map) => {
                let end = self.offset + self.len * STREAM_RECORD_BYTES as usize;
                bytemuck::cast_slice(&map[self.offset..end])
            }
            None => &[],
        }
    }
}

impl Drop for MappedIds {
    fn drop(&mut self) {
        if !self.temporary {
            return;
        }
        // Unmap before unlinking.
        self.map.take();
        if let Err(err) = fs::remove_file(&self.path) {
            log::warn!("could not release {}: {}", self.path.display(), err);
        }
    }
}

/// Read side of a subset list for one axis.
pub enum IdList {
    Memory(Vec<u32>),
    Mapped(MappedIds),
}

impl IdList {
    pub fn as_slice(&self) -> &[u32] {
        match self {
            IdList::Memory(ids) => ids,
            IdList::Mapped(ids) => ids.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append side of a subset list.
pub enum IdListBuilder {
    Memory(Vec<u32>),
    Disk {
        path: PathBuf,
        writer: BufWriter<File>,
        len: usize,
    },
}

impl IdListBuilder {
    pub fn push(&mut self, id: u32) -> Result<()> {
        match self {
            IdListBuilder::Memory(ids) => ids.push(id),
            IdListBuilder::Disk { writer, len, .. } => {
                writer.write_u32::<LittleEndian>(id)?;
                *len += 1;
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<IdList> {
        match self {
            IdListBuilder::Memory(mut ids) => {
                ids.shrink_to_fit();
                Ok(IdList::Memory(ids))
            }
            IdListBuilder::Disk {
                path,
                mut writer,
                len,
            } => {
                writer.flush()?;
                drop(writer);
                Ok(IdList::Mapped(MappedIds::map_file(&path, 0, len, true)?))
            }
        }
    }
}

/// The three per-axis lists of one subset. Each list holds the same ids,
/// sorted along its own axis.
pub struct AxisLists {
    lists: [IdList; 3],
}

impl AxisLists {
    pub fn new(x: IdList, y: IdList, z: IdList) -> Self {
        Self { lists: [x, y, z] }
    }

    pub fn from_vecs(x: Vec<u32>, y: Vec<u32>, z: Vec<u32>) -> Self {
        Self::new(IdList::Memory(x), IdList::Memory(y), IdList::Memory(z))
    }

    pub fn axis(&self, axis: Axis) -> &[u32] {
        self.lists[axis.index()].as_slice()
    }

    /// Subset cardinality (all three lists agree).
    pub fn len(&self) -> usize {
        self.lists[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Left or right child of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn letter(self) -> char {
        match self {
            Side::Left => 'L',
            Side::Right => 'R',
        }
    }
}

/// Where new subset lists are created. Chosen once per build.
#[derive(Debug, Clone)]
pub enum SubsetStore {
    InMemory,
    DiskBacked { dir: PathBuf },
}

impl SubsetStore {
    /// Name of a child subset: the parent's path plus `_L` or `_R`.
    pub fn child_name(parent: &str, side: Side, serial: u64) -> String {
        if parent.len() >= MAX_SUBSET_NAME_LEN {
            return format!("deep{serial}");
        }
        format!("{parent}_{}", side.letter())
    }

    /// Builders for the three axis lists of the `side` child of `parent`.
    /// Disk-backed lists are written to `<parent>-<axis><L|R>.bin`.
    pub fn builders(
        &self,
        parent: &str,
        side: Side,
        capacity: usize,
    ) -> Result<[IdListBuilder; 3]> {
        match self {
            SubsetStore::InMemory => Ok([
                IdListBuilder::Memory(Vec::with_capacity(capacity)),
                IdListBuilder::Memory(Vec::with_capacity(capacity)),
                IdListBuilder::Memory(Vec::with_capacity(capacity)),
            ]),
            SubsetStore::DiskBacked { dir } => {
                let open = |axis: Axis| -> Result<IdListBuilder> {
                    let file = format!("{parent}-{}{}.bin", axis.name(), side.letter());
                    let path = dir.join(file);
                    Ok(IdListBuilder::Disk {
                        writer: BufWriter::new(File::create(&path)?),
                        path,
                        len: 0,
                    })
                };
                Ok([open(Axis::X)?, open(Axis::Y)?, open(Axis::Z)?])
            }
        }
    }
}
