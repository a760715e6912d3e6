use crate::{ConflictResolution, MergeStrategy};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default chunk size used when streaming file content for comparison.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// The default strategy used to resolve merge conflicts.
pub const DEFAULT_MERGE_STRATEGY: MergeStrategy = MergeStrategy::Overwrite;

/// The default policy for files that already exist on disk during materialization.
pub const DEFAULT_CONFLICT_RESOLUTION: ConflictResolution = ConflictResolution::Overwrite;

/// Whether materialization clears the target directory first by default.
pub const DEFAULT_CLEAN_TARGET: bool = true;

/// The default glob pattern of a query. Matches every file.
pub const DEFAULT_PATH_PATTERN: &str = "*";

/// The group key used by `View::group_by_extension` for files without an extension.
pub const NO_EXTENSION_GROUP: &str = "(no extension)";
