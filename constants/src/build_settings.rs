/// Default memory ceiling for the run writer buffer (2 GB).
pub const DEFAULT_MEMORY_CAP_BYTES: u64 = 2 * 1_000_000_000;

/// Estimated bytes held per buffered point: the record itself plus one
/// sorted copy for each axis while a batch is flushed.
pub const BYTES_PER_BUFFERED_POINT: u64 = 64;

/// Default leaf bucket size.
pub const DEFAULT_BUCKET_SIZE: u32 = 2;

/// Working set estimate per point for the in-memory build: two id lists
/// of u32 (parent and children) plus the 12 byte position.
pub const LIST_BYTES_PER_POINT: u64 = 8;
pub const POSITION_BYTES_PER_POINT: u64 = 12;

/// Name of the default work location created beside the outputs.
pub const DEFAULT_WORK_DIR_NAME: &str = "tmp";

/// Prefixes of the per-stage directories made inside the work location.
pub const SORT_WORK_PREFIX: &str = "sort-";
pub const BUILD_WORK_PREFIX: &str = "build-";

/// How often (in points) ingestion progress is reported.
pub const PROGRESS_REPORT_INTERVAL: u64 = 50_000;
