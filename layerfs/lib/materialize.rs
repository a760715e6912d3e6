use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use crate::{
    backend::stat_opt, streaming::contents_equal, traverse::list_files, LayerFsConfig,
    LayerFsError, LayerFsResult, StorageBackend, ViewQuery, VirtualPath, DEFAULT_READ_CHUNK_SIZE,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The message recorded for an existing file under [`ConflictResolution::Error`].
pub const FILE_ALREADY_EXISTS: &str = "File already exists";

/// The total passed to progress callbacks, which is never known ahead of time.
pub const UNKNOWN_TOTAL: i64 = -1;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How materialization handles a file that already exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// The existing file is replaced.
    Overwrite,

    /// The existing file is kept and the path is recorded as skipped.
    Skip,

    /// The existing file is kept and the path is recorded as an error.
    Error,
}

/// The kind of difference found for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// The path exists only in the newer layer.
    Added,

    /// The path exists in both layers with different content.
    Modified,

    /// The path exists only in the older layer.
    Deleted,
}

/// The difference for one path between two layers.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct FileChange {
    /// The path that changed.
    #[getset(get = "pub with_prefix")]
    path: VirtualPath,

    /// What kind of change it is.
    #[getset(get_copy = "pub with_prefix")]
    change_type: ChangeType,

    /// The size before the change. `None` for added files.
    #[getset(get_copy = "pub with_prefix")]
    old_size: Option<u64>,

    /// The size after the change. `None` for deleted files.
    #[getset(get_copy = "pub with_prefix")]
    new_size: Option<u64>,
}

/// The outcome of a materialization.
///
/// Like a merge, materialization carries on past per-file failures; `skipped` and `errors` must
/// be checked to know whether every file was written.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct MaterializationResult {
    /// The directory the files were written to.
    #[getset(get = "pub with_prefix")]
    target_path: PathBuf,

    /// The number of files written.
    #[getset(get_copy = "pub with_prefix")]
    files_written: u64,

    /// The number of bytes written.
    #[getset(get_copy = "pub with_prefix")]
    bytes_written: u64,

    /// One entry per file written, in write order.
    #[getset(get = "pub with_prefix")]
    changes: Vec<FileChange>,

    /// Files left alone because they already existed.
    #[getset(get = "pub with_prefix")]
    skipped: Vec<VirtualPath>,

    /// The paths that could not be written and why.
    #[getset(get = "pub with_prefix")]
    errors: Vec<(VirtualPath, String)>,
}

/// Called after every file written with the path, the files written so far and the total, which
/// is always [`UNKNOWN_TOTAL`].
pub type ProgressCallback = Arc<dyn Fn(&VirtualPath, u64, i64) + Send + Sync>;

/// Copies virtual layers onto disk and compares layers.
#[derive(Clone)]
pub struct Materializer {
    conflict_resolution: ConflictResolution,
    progress: Option<ProgressCallback>,
    chunk_size: usize,
}

/// A directory being copied, its destination and the entries of it not yet visited.
type Frame = (VirtualPath, PathBuf, std::vec::IntoIter<String>);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FileChange {
    /// Creates a change for a file that only exists in the newer layer.
    pub fn added(path: VirtualPath, new_size: u64) -> Self {
        Self {
            path,
            change_type: ChangeType::Added,
            old_size: None,
            new_size: Some(new_size),
        }
    }

    /// Creates a change for a file whose content differs between the layers.
    pub fn modified(path: VirtualPath, old_size: u64, new_size: u64) -> Self {
        Self {
            path,
            change_type: ChangeType::Modified,
            old_size: Some(old_size),
            new_size: Some(new_size),
        }
    }

    /// Creates a change for a file that only exists in the older layer.
    pub fn deleted(path: VirtualPath, old_size: u64) -> Self {
        Self {
            path,
            change_type: ChangeType::Deleted,
            old_size: Some(old_size),
            new_size: None,
        }
    }
}

impl MaterializationResult {
    fn new(target_path: PathBuf) -> Self {
        Self {
            target_path,
            files_written: 0,
            bytes_written: 0,
            changes: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn record_error(&mut self, path: &VirtualPath, error: &LayerFsError) {
        tracing::warn!("failed to materialize {}: {}", path, error);
        self.errors.push((path.clone(), error.to_string()));
    }
}

impl Materializer {
    /// Creates a materializer.
    ///
    /// ## Arguments
    ///
    /// * `conflict_resolution` - How to handle files that already exist on disk
    /// * `progress` - Called after every file written
    pub fn new(
        conflict_resolution: ConflictResolution,
        progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            conflict_resolution,
            progress,
            chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }

    /// Creates a materializer using the conflict resolution and chunk size of `config`.
    pub fn from_config(config: &LayerFsConfig) -> Self {
        Self::new(config.get_conflict_resolution(), None)
            .with_chunk_size(config.get_read_chunk_size())
    }

    /// Sets the chunk size used when streaming files for comparison.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the progress callback.
    pub fn with_progress(
        mut self,
        progress: impl Fn(&VirtualPath, u64, i64) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Returns the conflict resolution policy.
    pub fn get_conflict_resolution(&self) -> ConflictResolution {
        self.conflict_resolution
    }

    /// Copies the logical content of `overlay`, on top of `base` if given, into `target`.
    ///
    /// The base is copied in full first, then the overlay is copied on top. `filters` only apply
    /// to the overlay pass: an overlay file is copied if it matches the query's glob, regex and
    /// size bounds. Without filters the directory tree is copied as is, empty directories
    /// included. With filters, overlay directories are only created on disk once a file under
    /// them is copied. Existing files are handled by the conflict resolution policy in both passes,
    /// so under [`ConflictResolution::Overwrite`] overlay files replace base files.
    ///
    /// Every written file is reported as [`ChangeType::Added`], including files that replaced an
    /// existing one. Use [`diff`](Self::diff) to tell additions from modifications.
    ///
    /// ## Arguments
    ///
    /// * `overlay` - The layer to copy
    /// * `target` - The directory on disk to copy into
    /// * `base` - A layer copied before the overlay
    /// * `filters` - Restricts which overlay files are copied
    /// * `clean` - Whether to delete `target` before copying
    ///
    /// ## Errors
    ///
    /// Only failing to prepare `target` is an error. Failures on individual files are recorded in
    /// the result.
    pub async fn materialize(
        &self,
        overlay: &dyn StorageBackend,
        target: impl AsRef<Path>,
        base: Option<&dyn StorageBackend>,
        filters: Option<&ViewQuery>,
        clean: bool,
    ) -> LayerFsResult<MaterializationResult> {
        let target = target.as_ref();
        if clean && tokio::fs::try_exists(target).await? {
            tracing::debug!("cleaning {}", target.display());
            tokio::fs::remove_dir_all(target).await?;
        }
        tokio::fs::create_dir_all(target).await?;

        let mut result = MaterializationResult::new(target.to_path_buf());
        if let Some(base) = base {
            self.copy_layer(base, target, None, &mut result).await;
        }
        self.copy_layer(overlay, target, filters, &mut result).await;

        tracing::info!(
            "materialized {} file(s) ({} bytes) into {}: {} skipped, {} error(s)",
            result.files_written,
            result.bytes_written,
            target.display(),
            result.skipped.len(),
            result.errors.len()
        );

        Ok(result)
    }

    async fn copy_layer(
        &self,
        source: &dyn StorageBackend,
        target: &Path,
        filters: Option<&ViewQuery>,
        result: &mut MaterializationResult,
    ) {
        let mut stack: Vec<Frame> = Vec::new();
        stack.extend(open_dir(source, &VirtualPath::root(), target, result).await);

        loop {
            let Some((dir, dest_dir, names)) = stack.last_mut() else {
                break;
            };
            let Some(name) = names.next() else {
                stack.pop();
                continue;
            };

            let path = dir.join(&name);
            let dest = dest_dir.join(&name);
            match self.copy_entry(source, &path, &dest, filters, result).await {
                Ok(true) => stack.extend(open_dir(source, &path, &dest, result).await),
                Ok(false) => {}
                Err(e) => result.record_error(&path, &e),
            }
        }
    }

    /// Copies one entry. Returns `true` if the entry is a directory to descend into.
    async fn copy_entry(
        &self,
        source: &dyn StorageBackend,
        path: &VirtualPath,
        dest: &Path,
        filters: Option<&ViewQuery>,
        result: &mut MaterializationResult,
    ) -> LayerFsResult<bool> {
        let Some(stat) = stat_opt(source, path).await? else {
            tracing::debug!("path disappeared during materialization: {}", path);
            return Ok(false);
        };

        if stat.is_directory() {
            // Filtered copies only create directories that end up holding a file
            if filters.is_none() {
                tokio::fs::create_dir_all(dest).await?;
            }
            return Ok(true);
        }

        if filters.is_some_and(|query| !query.matches(path, &stat)) {
            tracing::trace!("filtered out {}", path);
            return Ok(false);
        }

        if tokio::fs::try_exists(dest).await? {
            match self.conflict_resolution {
                ConflictResolution::Overwrite => {}
                ConflictResolution::Skip => {
                    tracing::debug!("skipping existing file {}", dest.display());
                    result.skipped.push(path.clone());
                    return Ok(false);
                }
                ConflictResolution::Error => {
                    tracing::warn!("file already exists: {}", dest.display());
                    result
                        .errors
                        .push((path.clone(), FILE_ALREADY_EXISTS.to_string()));
                    return Ok(false);
                }
            }
        }

        let content = source.read_file(path).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &content).await?;

        let size = content.len() as u64;
        result.files_written += 1;
        result.bytes_written += size;
        result.changes.push(FileChange::added(path.clone(), size));
        if let Some(progress) = &self.progress {
            progress(path, result.files_written, UNKNOWN_TOTAL);
        }

        Ok(false)
    }

    /// Computes the changes `overlay` makes to `base` under `root`.
    ///
    /// Files only in the overlay are added. Files in both are modified if their sizes differ, or
    /// if their sizes match and their content does not; content is compared by streaming both
    /// files. Files only in the base are not reported.
    ///
    /// Added paths come first in lexical order, then modified paths in lexical order. Files that
    /// disappear while diffing are skipped.
    pub async fn diff(
        &self,
        overlay: &dyn StorageBackend,
        base: &dyn StorageBackend,
        root: impl Into<VirtualPath>,
    ) -> LayerFsResult<Vec<FileChange>> {
        let root = root.into();
        let overlay_files = sizes(overlay, &root).await?;
        let base_files = sizes(base, &root).await?;

        let mut added = Vec::new();
        let mut modified = Vec::new();
        for (path, &new_size) in &overlay_files {
            let Some(&old_size) = base_files.get(path) else {
                added.push(FileChange::added(path.clone(), new_size));
                continue;
            };

            if old_size != new_size {
                modified.push(FileChange::modified(path.clone(), old_size, new_size));
                continue;
            }

            match contents_equal(overlay, base, path, self.chunk_size).await {
                Ok(true) => {}
                Ok(false) => modified.push(FileChange::modified(path.clone(), old_size, new_size)),
                Err(e) if e.is_not_found() => {
                    tracing::debug!("path disappeared during diff: {}", path);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "diff of {}: {} added, {} modified",
            root,
            added.len(),
            modified.len()
        );

        added.append(&mut modified);
        Ok(added)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Lists a source directory for copying. A vanished directory yields nothing.
async fn open_dir(
    source: &dyn StorageBackend,
    dir: &VirtualPath,
    dest: &Path,
    result: &mut MaterializationResult,
) -> Option<Frame> {
    match source.readdir(dir).await {
        Ok(names) => Some((dir.clone(), dest.to_path_buf(), names.into_iter())),
        Err(e) if e.is_not_found() => {
            tracing::debug!("directory disappeared during materialization: {}", dir);
            None
        }
        Err(e) => {
            result.record_error(dir, &e);
            None
        }
    }
}

async fn sizes(
    backend: &dyn StorageBackend,
    root: &VirtualPath,
) -> LayerFsResult<BTreeMap<VirtualPath, u64>> {
    Ok(list_files(backend, root)
        .await?
        .into_iter()
        .map(|(path, stat)| (path, stat.get_size()))
        .collect())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Materializer {
    fn default() -> Self {
        Self::new(crate::DEFAULT_CONFLICT_RESOLUTION, None)
    }
}

impl fmt::Debug for Materializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Materializer")
            .field("conflict_resolution", &self.conflict_resolution)
            .field("progress", &self.progress.is_some())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
