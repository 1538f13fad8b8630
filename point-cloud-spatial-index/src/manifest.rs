/// JSON sidecars describing finished sort and tree outputs and the files
/// they were built from.
use crate::bounding_volume::BoundingVolumeKind;
use crate::config::{BuildConfig, BuildInputs, StorageMode};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Build statistics and file references for one tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TreeManifest {
    /// Number of points indexed by the tree.
    pub element_count: u32,
    /// Edges from the root to the deepest leaf.
    pub depth: u32,
    pub bucket_size: u32,
    pub bounding_volume: BoundingVolumeKind,
    /// Storage mode the build actually ran with.
    pub storage: StorageMode,
    pub internal_nodes: u64,
    pub leaves: u64,
    pub tree_bytes: u64,
    /// World position of coordinate `(0, 0, 0)` in the position buffer.
    #[serde(default)]
    pub origin: [f64; 3],
    pub files: TreeFiles,
}

/// What the sort stage produced, written as `<stem>_SORT.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SortManifest {
    pub element_count: u32,
    pub runs_per_axis: u32,
    /// World position subtracted from every point before narrowing.
    pub origin: [f64; 3],
}

impl SortManifest {
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::info!("Generated sort manifest: {}", path.display());
        Ok(())
    }

    /// Reads the manifest at `path`, or `None` if the sort stage did not
    /// leave one (e.g. a position buffer produced elsewhere).
    pub fn read_if_present(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// File names relative to the manifest's directory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TreeFiles {
    pub x: String,
    pub y: String,
    pub z: String,
    pub positions: String,
    pub tree: String,
}

impl TreeFiles {
    pub fn new(inputs: &BuildInputs, tree: &Path) -> Self {
        Self {
            x: file_name(&inputs.x),
            y: file_name(&inputs.y),
            z: file_name(&inputs.z),
            positions: file_name(&inputs.positions),
            tree: file_name(tree),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Statistics gathered while writing a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeSummary {
    pub elements: u32,
    pub depth: u32,
    pub internal_nodes: u64,
    pub leaves: u64,
    pub bytes: u64,
}

impl TreeManifest {
    pub fn new(
        summary: &TreeSummary,
        config: &BuildConfig,
        storage: StorageMode,
        origin: [f64; 3],
        files: TreeFiles,
    ) -> Self {
        Self {
            element_count: summary.elements,
            depth: summary.depth,
            bucket_size: config.bucket_size,
            bounding_volume: config.bounding_volume,
            storage,
            internal_nodes: summary.internal_nodes,
            leaves: summary.leaves,
            tree_bytes: summary.bytes,
            origin,
            files,
        }
    }

    /// Sidecar location: the tree file with a `.json` extension.
    pub fn path_for(tree: &Path) -> PathBuf {
        tree.with_extension("json")
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let manifest_json = serde_json::to_string_pretty(self)?;
        fs::write(path, manifest_json)?;
        log::info!("Generated tree manifest: {}", path.display());
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Prints the manifest summary.
    pub fn print_summary(&self) {
        println!("Tree Summary:");
        println!("  Points: {}", self.element_count);
        println!("  Depth: {}", self.depth);
        println!(
            "  Nodes: {} internal, {} leaves (bucket {})",
            self.internal_nodes, self.leaves, self.bucket_size
        );
        println!("  Bounding volume: {}", self.bounding_volume);
        println!("  Storage: {:?}", self.storage);
        println!(
            "  Origin: X={}, Y={}, Z={}",
            self.origin[0], self.origin[1], self.origin[2]
        );
        println!(
            "  Tree file: {} ({:.2} MB)",
            self.files.tree,
            self.tree_bytes as f64 / 1_000_000.0
        );
    }
}
