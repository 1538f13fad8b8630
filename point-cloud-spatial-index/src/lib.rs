/// Out-of-core spatial index builder for large point clouds.
///
/// The sort stage turns a point source into a position buffer plus three
/// axis-sorted id streams using bounded memory. The build stage turns those
/// into a disk-resident median-split tree with per-node bounding volumes.
pub mod analyzer;
pub mod bounding_volume;
pub mod config;
pub mod error;
pub mod id_list;
pub mod manifest;
pub mod memory;
pub mod merge;
pub mod partition;
pub mod ply;
pub mod point;
pub mod positions;
pub mod progress;
pub mod run_file;
pub mod run_writer;
pub mod scheduler;
pub mod sorter;
pub mod source;
pub mod tree_builder;
pub mod tree_reader;
pub mod verify;
pub mod work_dir;

pub use bounding_volume::{BoundingVolume, BoundingVolumeKind};
pub use config::{BuildConfig, BuildInputs, SortConfig, StorageMode};
pub use error::{BuildError, Result};
pub use manifest::{SortManifest, TreeManifest, TreeSummary};
pub use ply::PlySource;
pub use point::{Axis, Point3};
pub use positions::{InMemoryPositions, MappedPositions, PositionLookup};
pub use progress::{ConsoleProgress, NoProgress, ProgressObserver};
pub use sorter::{SortOutput, sort_points};
pub use source::{LasSource, MemorySource, PointSource, PositionFileSource};
pub use tree_builder::{BuildOutput, build_tree};
pub use tree_reader::{TreeView, read_tree_file};
pub use verify::{VerifyReport, verify_axis_stream, verify_manifest, verify_tree};
