/// Spatial index tree construction.
///
/// The tree is written depth first into one seekable stream. Internal nodes
/// reserve two child offset words that are filled in once each child's
/// position is known, and the header depth is patched after the last leaf.
use crate::analyzer::analyze;
use crate::bounding_volume::{BoundingVolume, BoundingVolumeKind};
use crate::config::{BuildConfig, BuildInputs, StorageMode};
use crate::error::{BuildError, Result};
use crate::id_list::{AxisLists, IdList, MappedIds, Side, SubsetStore};
use crate::manifest::{SortManifest, TreeFiles, TreeManifest, TreeSummary};
use crate::memory::{available_memory, resolve_storage};
use crate::partition::partition;
use crate::point::{Axis, position_word_offset};
use crate::positions::{MappedPositions, PositionLookup};
use crate::progress::ProgressObserver;
use crate::run_file::{read_axis_stream, read_stream_count};
use crate::work_dir::WorkDir;
use byteorder::{LittleEndian, WriteBytesExt};
use constants::build_settings::BUILD_WORK_PREFIX;
use constants::file_format::{
    FLOATS_PER_POINT, LEAF_SENTINEL_BITS, ROOT_SUBSET_NAME, TREE_DEPTH_WORD, UNRESOLVED_WORD,
    WORD_BYTES,
};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// A subset waiting to be written, with the slot in its parent that must
/// receive its word offset.
struct PendingSubtree {
    lists: AxisLists,
    name: String,
    depth: u32,
    parent_slot: Option<u64>,
}

/// Writes one tree into `out`.
pub struct TreeWriter<'a, W: Write + Seek> {
    out: W,
    /// Bytes written so far, also the current stream position.
    position: u64,
    positions: &'a dyn PositionLookup,
    store: SubsetStore,
    bucket_size: usize,
    kind: BoundingVolumeKind,
    observer: &'a dyn ProgressObserver,
    summary: TreeSummary,
    serial: u64,
}

impl<'a, W: Write + Seek> TreeWriter<'a, W> {
    pub fn new(
        out: W,
        positions: &'a dyn PositionLookup,
        store: SubsetStore,
        config: &BuildConfig,
        observer: &'a dyn ProgressObserver,
    ) -> Self {
        Self {
            out,
            position: 0,
            positions,
            store,
            bucket_size: config.bucket_size as usize,
            kind: config.bounding_volume,
            observer,
            summary: TreeSummary::default(),
            serial: 0,
        }
    }

    /// Writes the header and every node reachable from `root`, then patches
    /// the depth. Returns the stream and the build statistics.
    pub fn write(mut self, root: AxisLists) -> Result<(W, TreeSummary)> {
        self.kind.ensure_buildable()?;
        let elements = u32::try_from(root.len())
            .map_err(|_| BuildError::config("too many points for 32-bit ids"))?;
        self.summary.elements = elements;

        self.put(UNRESOLVED_WORD)?;
        self.put(elements)?;
        self.put(self.kind.code())?;

        // Explicit stack: degenerate inputs (many equal coordinates) can make
        // the tree as deep as it is large.
        let mut stack = vec![PendingSubtree {
            lists: root,
            name: ROOT_SUBSET_NAME.to_string(),
            depth: 0,
            parent_slot: None,
        }];

        while let Some(pending) = stack.pop() {
            let offset = self.word_offset()?;
            if let Some(slot) = pending.parent_slot {
                self.patch(slot, offset)?;
            }

            if pending.lists.len() <= self.bucket_size {
                self.write_leaf(&pending.lists, pending.depth)?;
                continue;
            }

            let [left, right] = self.write_node(pending.lists, &pending.name)?;
            let slot = self.position - 2 * WORD_BYTES;

            // Right goes on the stack first so the left subtree is written
            // first.
            for ((lists, name), parent_slot) in [(right, slot + WORD_BYTES), (left, slot)] {
                if !lists.is_empty() {
                    stack.push(PendingSubtree {
                        lists,
                        name,
                        depth: pending.depth + 1,
                        parent_slot: Some(parent_slot),
                    });
                }
            }
        }

        self.patch(TREE_DEPTH_WORD * WORD_BYTES, self.summary.depth)?;
        self.out.flush()?;
        self.summary.bytes = self.position;
        Ok((self.out, self.summary))
    }

    /// Analyzes and partitions one subset, writes its node and returns the
    /// left and right children with their names. The parent lists are
    /// released before the node is written.
    fn write_node(&mut self, lists: AxisLists, name: &str) -> Result<[(AxisLists, String); 2]> {
        let choice = analyze(&lists, self.positions)
            .ok_or_else(|| BuildError::config(format!("subset {name} has no points")))?;
        let volume = BoundingVolume::compute(
            self.kind,
            choice.median,
            choice.min,
            choice.max,
            choice.cut_axis,
        )?;

        let capacity = lists.len() / 2 + 1;
        let left_name = self.child_name(name, Side::Left);
        let right_name = self.child_name(name, Side::Right);
        let left = self.store.builders(name, Side::Left, capacity)?;
        let right = self.store.builders(name, Side::Right, capacity)?;
        let (left, right) = partition(&lists, &choice, self.positions, left, right)?;
        drop(lists);

        for word in volume.to_words() {
            self.put(word)?;
        }
        self.put(position_word_offset(choice.median_id))?;
        self.put(UNRESOLVED_WORD)?;
        self.put(UNRESOLVED_WORD)?;

        self.summary.internal_nodes += 1;
        self.observer.points_placed(1);
        Ok([(left, left_name), (right, right_name)])
    }

    /// Leaf ids are written in X order.
    fn write_leaf(&mut self, lists: &AxisLists, depth: u32) -> Result<()> {
        let ids = lists.axis(Axis::X);
        self.put(LEAF_SENTINEL_BITS)?;
        self.put(ids.len() as u32)?;
        for &id in ids {
            self.put(position_word_offset(id))?;
        }

        self.summary.leaves += 1;
        self.summary.depth = self.summary.depth.max(depth);
        self.observer.points_placed(ids.len() as u64);
        Ok(())
    }

    fn child_name(&mut self, parent: &str, side: Side) -> String {
        self.serial += 1;
        SubsetStore::child_name(parent, side, self.serial)
    }

    fn put(&mut self, word: u32) -> Result<()> {
        self.out.write_u32::<LittleEndian>(word)?;
        self.position += WORD_BYTES;
        Ok(())
    }

    fn word_offset(&self) -> Result<u32> {
        u32::try_from(self.position / WORD_BYTES)
            .map_err(|_| BuildError::config("tree exceeds the 32-bit word offset range"))
    }

    /// Overwrites the word at byte offset `at` and returns to the end.
    fn patch(&mut self, at: u64, word: u32) -> Result<()> {
        self.out.seek(SeekFrom::Start(at))?;
        self.out.write_u32::<LittleEndian>(word)?;
        self.out.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }
}

/// Result of a complete build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub tree: PathBuf,
    pub manifest: PathBuf,
    pub storage: StorageMode,
    pub summary: TreeSummary,
}

/// Builds the tree for `inputs`. Every input is validated before the tree
/// file is created.
pub fn build_tree(
    inputs: &BuildInputs,
    config: &BuildConfig,
    observer: &dyn ProgressObserver,
) -> Result<BuildOutput> {
    let start_time = Instant::now();
    config.validate()?;

    let positions = MappedPositions::open(&inputs.positions)?;
    let count = positions.len();
    // Leaves and medians store `id * 3` in a 32-bit word.
    let max_points = u32::MAX as u64 / FLOATS_PER_POINT as u64;
    if count > max_points {
        return Err(BuildError::config(format!(
            "{count} points exceed the {max_points} addressable by 32-bit word offsets"
        )));
    }
    for axis in Axis::ALL {
        let found = read_stream_count(inputs.axis(axis))? as u64;
        if found != count {
            return Err(BuildError::counts(format!("{axis} stream"), count, found));
        }
    }
    let origin = match SortManifest::read_if_present(&inputs.sort_manifest_path())? {
        Some(sorted) if sorted.element_count as u64 != count => {
            return Err(BuildError::counts(
                "sort manifest",
                count,
                sorted.element_count as u64,
            ));
        }
        Some(sorted) => sorted.origin,
        None => [0.0; 3],
    };

    let available = match config.storage {
        StorageMode::Auto => available_memory(),
        _ => 0,
    };
    let storage = resolve_storage(config.storage, count, available);
    log::info!(
        "Building {} tree over {} points (bucket {}, {:?})",
        config.bounding_volume,
        count,
        config.bucket_size,
        storage
    );

    let root = load_root_lists(inputs, storage)?;
    for axis in Axis::ALL {
        check_permutation(root.axis(axis), count as u32, inputs.axis(axis))?;
    }

    let (store, work_dir) = match storage {
        StorageMode::DiskBacked => {
            let work_dir = WorkDir::create(&config.work_dir, BUILD_WORK_PREFIX)?;
            let store = SubsetStore::DiskBacked {
                dir: work_dir.path().to_path_buf(),
            };
            (store, Some(work_dir))
        }
        _ => (SubsetStore::InMemory, None),
    };

    let tree_path = inputs.tree_path(config);
    let out = BufWriter::new(File::create(&tree_path)?);
    let (_, summary) = match storage {
        StorageMode::DiskBacked => {
            TreeWriter::new(out, &positions, store, config, observer).write(root)?
        }
        _ => {
            let loaded = positions.load();
            TreeWriter::new(out, &loaded, store, config, observer).write(root)?
        }
    };

    if let Some(work_dir) = work_dir {
        work_dir.cleanup()?;
    }

    let manifest_path = TreeManifest::path_for(&tree_path);
    let files = TreeFiles::new(inputs, &tree_path);
    TreeManifest::new(&summary, config, storage, origin, files).write(&manifest_path)?;

    log::info!(
        "Tree written to {} in {:.2}s: depth {}, {} internal nodes, {} leaves",
        tree_path.display(),
        start_time.elapsed().as_secs_f64(),
        summary.depth,
        summary.internal_nodes,
        summary.leaves
    );

    Ok(BuildOutput {
        tree: tree_path,
        manifest: manifest_path,
        storage,
        summary,
    })
}

/// Root lists are the axis streams themselves: read fully for in-memory
/// builds, mapped for disk-backed ones.
fn load_root_lists(inputs: &BuildInputs, storage: StorageMode) -> Result<AxisLists> {
    let load = |axis: Axis| -> Result<IdList> {
        let path = inputs.axis(axis);
        match storage {
            StorageMode::DiskBacked => Ok(IdList::Mapped(MappedIds::open_stream(path)?)),
            _ => Ok(IdList::Memory(read_axis_stream(path)?)),
        }
    };
    Ok(AxisLists::new(load(Axis::X)?, load(Axis::Y)?, load(Axis::Z)?))
}

/// Every id below `count` must appear exactly once.
fn check_permutation(ids: &[u32], count: u32, path: &Path) -> Result<()> {
    if ids.len() as u64 != count as u64 {
        return Err(BuildError::counts(
            path.display().to_string(),
            count as u64,
            ids.len() as u64,
        ));
    }

    let mut seen = vec![0u64; (count as usize).div_ceil(64)];
    for &id in ids {
        if id >= count {
            return Err(BuildError::malformed(
                path,
                format!("id {id} is outside 0..{count}"),
            ));
        }
        let (word, bit) = (id as usize / 64, 1u64 << (id % 64));
        if seen[word] & bit != 0 {
            return Err(BuildError::malformed(path, format!("id {id} appears twice")));
        }
        seen[word] |= bit;
    }
    Ok(())
}
