/// Typed configuration for the sort and build stages, validated before any
/// output file is opened.
use crate::bounding_volume::BoundingVolumeKind;
use crate::error::{BuildError, Result};
use crate::point::Axis;
use constants::build_settings::{
    DEFAULT_BUCKET_SIZE, DEFAULT_MEMORY_CAP_BYTES, DEFAULT_WORK_DIR_NAME,
};
use constants::file_format::{POSITION_FILE_SUFFIX, SORT_MANIFEST_SUFFIX};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of concurrent merge workers per axis.
pub fn default_merge_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Settings for splitting a source into runs and merging them.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Directory receiving the axis streams and the position buffer.
    pub output_dir: PathBuf,
    /// File name prefix shared by every output.
    pub stem: String,
    /// Location in which a private directory for run files is created.
    pub work_dir: PathBuf,
    /// Memory ceiling for the run writer buffer.
    pub memory_cap_bytes: u64,
    /// Concurrent merge workers per axis.
    pub max_merge_workers: usize,
}

impl SortConfig {
    pub fn new(output_dir: &Path, stem: &str) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            stem: stem.to_string(),
            work_dir: output_dir.join(DEFAULT_WORK_DIR_NAME),
            memory_cap_bytes: DEFAULT_MEMORY_CAP_BYTES,
            max_merge_workers: default_merge_workers(),
        }
    }

    pub fn with_memory_cap(mut self, bytes: u64) -> Self {
        self.memory_cap_bytes = bytes;
        self
    }

    pub fn with_merge_workers(mut self, workers: usize) -> Self {
        self.max_merge_workers = workers;
        self
    }

    pub fn with_work_dir(mut self, work_dir: &Path) -> Self {
        self.work_dir = work_dir.to_path_buf();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stem.is_empty() {
            return Err(BuildError::config("output stem must not be empty"));
        }
        if self.memory_cap_bytes == 0 {
            return Err(BuildError::config("memory cap must be positive"));
        }
        if self.max_merge_workers == 0 {
            return Err(BuildError::config("at least one merge worker is required"));
        }
        Ok(())
    }

    pub fn axis_stream_path(&self, axis: Axis) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.bin", self.stem, axis.name()))
    }

    pub fn position_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}{}", self.stem, POSITION_FILE_SUFFIX))
    }

    pub fn sort_manifest_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}{}", self.stem, SORT_MANIFEST_SUFFIX))
    }
}

/// Where subsets live while the tree is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// Decide from the estimated working set and available memory.
    Auto,
    /// Keep every id list and all positions in memory.
    InMemory,
    /// Keep subsets in memory-mapped files in the work directory.
    DiskBacked,
}

/// Settings for the tree build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub bucket_size: u32,
    pub bounding_volume: BoundingVolumeKind,
    pub storage: StorageMode,
    /// Location in which a private directory for disk-backed subsets is
    /// created.
    pub work_dir: PathBuf,
}

impl BuildConfig {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            bounding_volume: BoundingVolumeKind::Sphere,
            storage: StorageMode::Auto,
            work_dir: work_dir.to_path_buf(),
        }
    }

    pub fn with_bucket_size(mut self, bucket_size: u32) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn with_bounding_volume(mut self, kind: BoundingVolumeKind) -> Self {
        self.bounding_volume = kind;
        self
    }

    pub fn with_storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket_size == 0 {
            return Err(BuildError::config("bucket size must be at least 1"));
        }
        self.bounding_volume.ensure_buildable()
    }
}

/// The four files the tree builder consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInputs {
    pub x: PathBuf,
    pub y: PathBuf,
    pub z: PathBuf,
    pub positions: PathBuf,
}

impl BuildInputs {
    /// Inputs named the way the sort stage writes them.
    pub fn from_sort_config(config: &SortConfig) -> Self {
        Self {
            x: config.axis_stream_path(Axis::X),
            y: config.axis_stream_path(Axis::Y),
            z: config.axis_stream_path(Axis::Z),
            positions: config.position_path(),
        }
    }

    pub fn axis(&self, axis: Axis) -> &Path {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    /// Tree file beside the position buffer:
    /// `<stem>_<KIND>_B<bucket>.bin`.
    pub fn tree_path(&self, config: &BuildConfig) -> PathBuf {
        self.beside_positions(&format!(
            "_{}_B{}.bin",
            config.bounding_volume, config.bucket_size
        ))
    }

    /// Sort manifest the sort stage wrote next to the position buffer.
    pub fn sort_manifest_path(&self) -> PathBuf {
        self.beside_positions(SORT_MANIFEST_SUFFIX)
    }

    fn beside_positions(&self, suffix: &str) -> PathBuf {
        let file_name = self
            .positions
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = file_name
            .strip_suffix(POSITION_FILE_SUFFIX)
            .unwrap_or(file_name.trim_end_matches(".bin"));

        let dir = self.positions.parent().unwrap_or(Path::new("."));
        dir.join(format!("{stem}{suffix}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_outputs_follow_one_naming_scheme() {
        let config = SortConfig::new(Path::new("/data"), "lucy");
        assert_eq!(config.axis_stream_path(Axis::Y), Path::new("/data/lucy_Y.bin"));
        assert_eq!(config.position_path(), Path::new("/data/lucy_DATA.bin"));
        assert_eq!(config.work_dir, Path::new("/data/tmp"));

        let inputs = BuildInputs::from_sort_config(&config);
        assert_eq!(inputs.sort_manifest_path(), config.sort_manifest_path());
        assert_eq!(inputs.sort_manifest_path(), Path::new("/data/lucy_SORT.json"));
    }

    #[test]
    fn tree_name_carries_kind_and_bucket() {
        let sort = SortConfig::new(Path::new("/data"), "lucy");
        let inputs = BuildInputs::from_sort_config(&sort);
        let build = BuildConfig::new(Path::new("/data/tmp"))
            .with_bucket_size(64)
            .with_bounding_volume(BoundingVolumeKind::Aabb);
        assert_eq!(inputs.tree_path(&build), Path::new("/data/lucy_AABB_B64.bin"));
    }

    #[test]
    fn invalid_settings_are_configuration_errors() {
        let build = BuildConfig::new(Path::new("tmp")).with_bucket_size(0);
        assert!(matches!(build.validate(), Err(BuildError::Config(_))));

        let build = BuildConfig::new(Path::new("tmp"))
            .with_bounding_volume(BoundingVolumeKind::None);
        assert!(matches!(build.validate(), Err(BuildError::Config(_))));

        let sort = SortConfig::new(Path::new("out"), "cloud").with_merge_workers(0);
        assert!(matches!(sort.validate(), Err(BuildError::Config(_))));

        let sort = SortConfig::new(Path::new("out"), "cloud").with_memory_cap(0);
        assert!(matches!(sort.validate(), Err(BuildError::Config(_))));
    }
}
