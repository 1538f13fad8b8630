/// Byte size of one 32-bit word. Child and point offsets in the tree file are
/// expressed in these units.
pub const WORD_BYTES: u64 = 4;

/// Size of the `u32` element count that prefixes run files and axis streams.
pub const COUNT_HEADER_BYTES: u64 = 4;

/// One position buffer record: f32 x, y, z.
pub const POSITION_RECORD_BYTES: u64 = 12;

/// Floats per position record, used to turn an id into a word offset.
pub const FLOATS_PER_POINT: u32 = 3;

/// One run record: u32 id followed by f32 x, y, z.
pub const RUN_RECORD_BYTES: u64 = 16;

/// Byte offset of the sort key inside a run record, indexed by axis.
pub const RUN_KEY_OFFSET: [u64; 3] = [4, 8, 12];

/// One axis stream record: u32 id.
pub const STREAM_RECORD_BYTES: u64 = 4;

/// Tree header: depth, element count, bounding volume kind.
pub const TREE_HEADER_WORDS: u64 = 3;

/// Word index of the depth field in the tree header (patched last).
pub const TREE_DEPTH_WORD: u64 = 0;

/// First word of a leaf. Internal nodes never start with these bits.
pub const LEAF_SENTINEL_BITS: u32 = 0;

/// Placeholder written for depth and child offsets until they are known.
/// Child offsets keep it when the child subset is empty.
pub const UNRESOLVED_WORD: u32 = u32::MAX;

/// Split plane word for a cut along X. Y and Z are written as their plain
/// axis codes (1, 2); X would collide with the leaf sentinel, so it is
/// written as this value instead, which read as a float is still positive.
pub const SPLIT_PLANE_X_WORD: u32 = 3;

/// Bounding volume kind codes stored in the tree header.
pub const KIND_SPHERE: u32 = 0;
pub const KIND_AABB: u32 = 1;
pub const KIND_NONE: u32 = 2;
pub const KIND_SPLIT_PLANE: u32 = 3;

/// Suffix of the position buffer next to the axis streams.
pub const POSITION_FILE_SUFFIX: &str = "_DATA.bin";

/// Suffix of the JSON record the sort stage leaves beside its outputs.
pub const SORT_MANIFEST_SUFFIX: &str = "_SORT.json";

/// Axis letters used in every file name.
pub const AXIS_NAMES: [&str; 3] = ["X", "Y", "Z"];

/// Name of the root subset when disk-backed subsets are written.
pub const ROOT_SUBSET_NAME: &str = "root";
