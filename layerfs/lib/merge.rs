use std::{fmt, sync::Arc};

use bytes::Bytes;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use crate::{
    backend::{read_opt, stat_opt},
    LayerFsConfig, LayerFsError, LayerFsResult, StorageBackend, Traversal, VirtualPath,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The message recorded for a conflict under [`MergeStrategy::Error`].
pub const CONFLICT_DETECTED: &str = "Conflict detected";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a merge handles a file whose content differs between source and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// The source content replaces the target content.
    Overwrite,

    /// The target keeps its content and the conflict is recorded.
    Preserve,

    /// Nothing is written and the path is recorded as an error.
    Error,

    /// A [`ConflictResolver`] decides the content and the conflict is recorded.
    Callback,
}

/// Two layers disagreeing on the content of one file.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct MergeConflict {
    /// The path of the file.
    #[getset(get = "pub with_prefix")]
    path: VirtualPath,

    /// The size of the source file.
    #[getset(get_copy = "pub with_prefix")]
    overlay_size: u64,

    /// The size of the target file.
    #[getset(get_copy = "pub with_prefix")]
    base_size: u64,

    /// The content of the source file.
    #[getset(get = "pub with_prefix")]
    overlay_content: Bytes,

    /// The content of the target file.
    #[getset(get = "pub with_prefix")]
    base_content: Bytes,
}

/// The outcome of a merge.
///
/// A merge does not stop at the first failure. Callers must check `conflicts` and `errors` to
/// find out whether every file made it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters, CopyGetters)]
pub struct MergeResult {
    /// The number of files written to the target.
    #[getset(get_copy = "pub with_prefix")]
    files_merged: u64,

    /// The conflicts found, in the order they were found.
    #[getset(get = "pub with_prefix")]
    conflicts: Vec<MergeConflict>,

    /// The paths that could not be merged and why.
    #[getset(get = "pub with_prefix")]
    errors: Vec<(VirtualPath, String)>,
}

/// Decides the content written for a conflicting file under [`MergeStrategy::Callback`].
pub trait ConflictResolver: Send + Sync {
    /// Returns the content to write for `conflict`.
    fn resolve(&self, conflict: &MergeConflict) -> Bytes;
}

/// Merges overlays into targets and rolls overlays back.
///
/// The strategy and resolver given at construction apply to every merge unless a call overrides
/// the strategy.
#[derive(Clone)]
pub struct OverlayOperations {
    strategy: MergeStrategy,
    resolver: Option<Arc<dyn ConflictResolver>>,
}

/// A directory being merged and the entries of it not yet visited.
type Frame = (VirtualPath, std::vec::IntoIter<String>);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MergeResult {
    /// Returns `true` if the merge had neither conflicts nor errors.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.errors.is_empty()
    }

    fn record_error(&mut self, path: &VirtualPath, error: &LayerFsError) {
        tracing::warn!("failed to merge {}: {}", path, error);
        self.errors.push((path.clone(), error.to_string()));
    }
}

impl OverlayOperations {
    /// Creates overlay operations with a default strategy and an optional conflict resolver.
    pub fn new(strategy: MergeStrategy, resolver: Option<Arc<dyn ConflictResolver>>) -> Self {
        Self { strategy, resolver }
    }

    /// Creates overlay operations using the merge strategy of `config`.
    pub fn from_config(config: &LayerFsConfig) -> Self {
        Self::new(config.get_merge_strategy(), None)
    }

    /// Returns the default merge strategy.
    pub fn get_strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Merges the files of `source` under `root` into `target`.
    ///
    /// Directories are walked depth-first and created on the target before their entries are
    /// merged. A file whose content differs on the target is a conflict and is handled by the
    /// strategy. Every file actually written counts toward `files_merged`, including files whose
    /// content was already identical.
    ///
    /// A missing `root` means there is nothing to merge. A `root` naming a file merges only that
    /// file. A failure on one entry is recorded in `errors` and the merge moves on to the next.
    ///
    /// ## Arguments
    ///
    /// * `source` - The layer to merge from
    /// * `target` - The layer to merge into
    /// * `root` - The path to merge
    /// * `strategy` - Overrides the default strategy for this call
    pub async fn merge(
        &self,
        source: &dyn StorageBackend,
        target: &dyn StorageBackend,
        root: impl Into<VirtualPath>,
        strategy: Option<MergeStrategy>,
    ) -> MergeResult {
        let root = root.into();
        let strategy = strategy.unwrap_or(self.strategy);
        let mut result = MergeResult::default();

        let mut stack: Vec<Frame> = Vec::new();
        match source.stat(&root).await {
            Ok(stat) if stat.is_file() => {
                if let Err(e) = self
                    .merge_file(source, target, &root, strategy, &mut result)
                    .await
                {
                    result.record_error(&root, &e);
                }
            }
            Ok(_) => stack.extend(open_dir(source, &root, &mut result).await),
            Err(e) if e.is_not_found() => {
                tracing::debug!("nothing to merge at {}", root);
            }
            Err(e) => result.record_error(&root, &e),
        }

        loop {
            let Some((dir, names)) = stack.last_mut() else {
                break;
            };
            let Some(name) = names.next() else {
                stack.pop();
                continue;
            };

            let path = dir.join(&name);
            match self
                .merge_entry(source, target, &path, strategy, &mut result)
                .await
            {
                Ok(true) => stack.extend(open_dir(source, &path, &mut result).await),
                Ok(false) => {}
                Err(e) => result.record_error(&path, &e),
            }
        }

        tracing::info!(
            "merged {} file(s) from {} with strategy {:?}: {} conflict(s), {} error(s)",
            result.files_merged,
            root,
            strategy,
            result.conflicts.len(),
            result.errors.len()
        );

        result
    }

    /// Merges one entry. Returns `true` if the entry is a directory to descend into.
    async fn merge_entry(
        &self,
        source: &dyn StorageBackend,
        target: &dyn StorageBackend,
        path: &VirtualPath,
        strategy: MergeStrategy,
        result: &mut MergeResult,
    ) -> LayerFsResult<bool> {
        let Some(stat) = stat_opt(source, path).await? else {
            tracing::debug!("path disappeared during merge: {}", path);
            return Ok(false);
        };

        if stat.is_directory() {
            if stat_opt(target, path).await?.is_none() {
                tracing::trace!("creating directory {} on target", path);
                target.mkdir(path).await?;
            }
            return Ok(true);
        }

        self.merge_file(source, target, path, strategy, result)
            .await?;
        Ok(false)
    }

    async fn merge_file(
        &self,
        source: &dyn StorageBackend,
        target: &dyn StorageBackend,
        path: &VirtualPath,
        strategy: MergeStrategy,
        result: &mut MergeResult,
    ) -> LayerFsResult<()> {
        let source_content = source.read_file(path).await?;
        let content = match read_opt(target, path).await? {
            Some(existing) if existing != source_content => {
                let conflict = MergeConflict {
                    path: path.clone(),
                    overlay_size: source_content.len() as u64,
                    base_size: existing.len() as u64,
                    overlay_content: source_content.clone(),
                    base_content: existing,
                };

                match strategy {
                    MergeStrategy::Overwrite => source_content,
                    MergeStrategy::Error => {
                        tracing::warn!("conflict at {}", path);
                        result
                            .errors
                            .push((path.clone(), CONFLICT_DETECTED.to_string()));
                        return Ok(());
                    }
                    MergeStrategy::Preserve => {
                        tracing::debug!("keeping target content of {}", path);
                        result.conflicts.push(conflict);
                        return Ok(());
                    }
                    MergeStrategy::Callback => {
                        let resolved = match &self.resolver {
                            Some(resolver) => resolver.resolve(&conflict),
                            None => source_content,
                        };
                        result.conflicts.push(conflict);
                        resolved
                    }
                }
            }
            _ => source_content,
        };

        target.write_file(path, content).await?;
        result.files_merged += 1;
        tracing::trace!("merged {}", path);

        Ok(())
    }

    /// Lists every file of `overlay` under `root`.
    ///
    /// Files that disappear during the walk are skipped.
    pub async fn list_changes(
        &self,
        overlay: &dyn StorageBackend,
        root: impl Into<VirtualPath>,
    ) -> LayerFsResult<Vec<VirtualPath>> {
        let entries = Traversal::new(overlay, root, true, false).collect().await?;
        Ok(entries.into_iter().map(|(path, _)| path).collect())
    }

    /// Removes files from `overlay`, revealing the base beneath.
    ///
    /// Without `paths`, every file listed by [`list_changes`](Self::list_changes) from `/` is
    /// removed. Returns the number of files removed.
    ///
    /// ## Errors
    ///
    /// Every path is attempted. If any removal failed, [`LayerFsError::ResetFailed`] lists each
    /// failing path and its reason; the paths that were removed stay removed.
    pub async fn reset_overlay(
        &self,
        overlay: &dyn StorageBackend,
        paths: Option<Vec<VirtualPath>>,
    ) -> LayerFsResult<usize> {
        let paths = match paths {
            Some(paths) => paths,
            None => self.list_changes(overlay, VirtualPath::root()).await?,
        };

        let mut removed = 0;
        let mut failures = Vec::new();
        for path in paths {
            match overlay.unlink(&path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!("failed to reset {}: {}", path, e);
                    failures.push((path, e.to_string()));
                }
            }
        }

        if !failures.is_empty() {
            return Err(LayerFsError::ResetFailed { failures });
        }

        tracing::info!("reset {} file(s) from overlay", removed);
        Ok(removed)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Lists a source directory for merging. A vanished directory yields nothing.
async fn open_dir(
    source: &dyn StorageBackend,
    dir: &VirtualPath,
    result: &mut MergeResult,
) -> Option<Frame> {
    match source.readdir(dir).await {
        Ok(names) => Some((dir.clone(), names.into_iter())),
        Err(e) if e.is_not_found() => {
            tracing::debug!("directory disappeared during merge: {}", dir);
            None
        }
        Err(e) => {
            result.record_error(dir, &e);
            None
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<F> ConflictResolver for F
where
    F: Fn(&MergeConflict) -> Bytes + Send + Sync,
{
    fn resolve(&self, conflict: &MergeConflict) -> Bytes {
        self(conflict)
    }
}

impl Default for OverlayOperations {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MERGE_STRATEGY, None)
    }
}

impl fmt::Debug for OverlayOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayOperations")
            .field("strategy", &self.strategy)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    async fn read(backend: &MemoryBackend, path: &str) -> Bytes {
        backend.read_file(&path.into()).await.unwrap()
    }

    #[tokio::test]
    async fn test_merge_overwrite_replaces_target() -> anyhow::Result<()> {
        let source = MemoryBackend::with_files([("/f", "new")]).await?;
        let target = MemoryBackend::with_files([("/f", "old")]).await?;

        let result = OverlayOperations::default()
            .merge(&source, &target, "/", Some(MergeStrategy::Overwrite))
            .await;

        assert_eq!(read(&target, "/f").await, "new");
        assert!(result.get_conflicts().is_empty());
        assert_eq!(result.get_files_merged(), 1);
        assert!(result.is_clean());

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_preserve_records_conflict() -> anyhow::Result<()> {
        let source = MemoryBackend::with_files([("/f", "new")]).await?;
        let target = MemoryBackend::with_files([("/f", "old")]).await?;

        let result = OverlayOperations::new(MergeStrategy::Preserve, None)
            .merge(&source, &target, "/", None)
            .await;

        assert_eq!(read(&target, "/f").await, "old");
        assert_eq!(result.get_files_merged(), 0);
        assert_eq!(result.get_conflicts().len(), 1);

        let conflict = &result.get_conflicts()[0];
        assert_eq!(conflict.get_path(), "/f");
        assert_eq!(conflict.get_overlay_content(), "new");
        assert_eq!(conflict.get_base_content(), "old");
        assert_eq!(conflict.get_overlay_size(), 3);
        assert_eq!(conflict.get_base_size(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_identical_content_is_not_a_conflict() -> anyhow::Result<()> {
        let source = MemoryBackend::with_files([("/f", "same")]).await?;
        let target = MemoryBackend::with_files([("/f", "same")]).await?;

        let result = OverlayOperations::new(MergeStrategy::Preserve, None)
            .merge(&source, &target, "/", None)
            .await;

        assert!(result.get_conflicts().is_empty());
        assert_eq!(result.get_files_merged(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_error_strategy_records_error_and_continues() -> anyhow::Result<()> {
        let source = MemoryBackend::with_files([("/a", "new"), ("/b", "added")]).await?;
        let target = MemoryBackend::with_files([("/a", "old")]).await?;

        let result = OverlayOperations::default()
            .merge(&source, &target, "/", Some(MergeStrategy::Error))
            .await;

        assert_eq!(read(&target, "/a").await, "old");
        assert_eq!(read(&target, "/b").await, "added");
        assert_eq!(result.get_files_merged(), 1);
        assert!(result.get_conflicts().is_empty());
        assert_eq!(
            result.get_errors(),
            &vec![(VirtualPath::from("/a"), CONFLICT_DETECTED.to_string())]
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_callback_uses_resolver() -> anyhow::Result<()> {
        let source = MemoryBackend::with_files([("/f", "ours")]).await?;
        let target = MemoryBackend::with_files([("/f", "theirs")]).await?;

        let resolver = |conflict: &MergeConflict| {
            let mut merged = conflict.get_base_content().to_vec();
            merged.extend_from_slice(b"+");
            merged.extend_from_slice(conflict.get_overlay_content());
            Bytes::from(merged)
        };

        let result = OverlayOperations::new(MergeStrategy::Callback, Some(Arc::new(resolver)))
            .merge(&source, &target, "/", None)
            .await;

        assert_eq!(read(&target, "/f").await, "theirs+ours");
        assert_eq!(result.get_conflicts().len(), 1);
        assert_eq!(result.get_files_merged(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_callback_without_resolver_writes_source() -> anyhow::Result<()> {
        let source = MemoryBackend::with_files([("/f", "ours")]).await?;
        let target = MemoryBackend::with_files([("/f", "theirs")]).await?;

        let result = OverlayOperations::new(MergeStrategy::Callback, None)
            .merge(&source, &target, "/", None)
            .await;

        assert_eq!(read(&target, "/f").await, "ours");
        assert_eq!(result.get_conflicts().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_creates_nested_directories() -> anyhow::Result<()> {
        let source = MemoryBackend::with_files([("/a/b/c.txt", "c"), ("/a/d.txt", "d")]).await?;
        source.mkdir(&"/empty".into()).await?;
        let target = MemoryBackend::new();

        let result = OverlayOperations::default()
            .merge(&source, &target, "/", None)
            .await;

        assert_eq!(result.get_files_merged(), 2);
        assert_eq!(read(&target, "/a/b/c.txt").await, "c");
        assert!(target.stat(&"/empty".into()).await?.is_directory());

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_missing_root_is_empty() -> anyhow::Result<()> {
        let source = MemoryBackend::new();
        let target = MemoryBackend::new();

        let result = OverlayOperations::default()
            .merge(&source, &target, "/does/not/exist", None)
            .await;

        assert_eq!(result, MergeResult::default());

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_single_file_root() -> anyhow::Result<()> {
        let source = MemoryBackend::with_files([("/dir/one.txt", "1"), ("/dir/two.txt", "2")])
            .await?;
        let target = MemoryBackend::new();

        let result = OverlayOperations::default()
            .merge(&source, &target, "/dir/one.txt", None)
            .await;

        assert_eq!(result.get_files_merged(), 1);
        assert_eq!(read(&target, "/dir/one.txt").await, "1");
        assert!(target.stat(&"/dir/two.txt".into()).await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_records_write_failures_per_entry() -> anyhow::Result<()> {
        let source = MemoryBackend::with_files([("/blocked/f", "x"), ("/ok", "y")]).await?;
        // A file on the target where the source has a directory
        let target = MemoryBackend::with_files([("/blocked", "file")]).await?;

        let result = OverlayOperations::default()
            .merge(&source, &target, "/", None)
            .await;

        assert_eq!(result.get_files_merged(), 1);
        assert_eq!(read(&target, "/ok").await, "y");
        assert_eq!(result.get_errors().len(), 1);
        assert_eq!(result.get_errors()[0].0, "/blocked/f");

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_list_changes_and_reset() -> anyhow::Result<()> {
        let overlay = MemoryBackend::with_files([("/a", "1"), ("/d/b", "2"), ("/d/e/c", "3")])
            .await?;
        let ops = OverlayOperations::default();

        let mut changes = ops.list_changes(&overlay, "/").await?;
        changes.sort();
        assert_eq!(
            changes,
            vec![
                VirtualPath::from("/a"),
                VirtualPath::from("/d/b"),
                VirtualPath::from("/d/e/c")
            ]
        );

        assert_eq!(ops.reset_overlay(&overlay, None).await?, 3);
        assert!(ops.list_changes(&overlay, "/").await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_reset_reports_every_failure() -> anyhow::Result<()> {
        let overlay = MemoryBackend::with_files([("/a", "1"), ("/b", "2")]).await?;
        let ops = OverlayOperations::default();

        let result = ops
            .reset_overlay(
                &overlay,
                Some(vec!["/a".into(), VirtualPath::root(), "/missing".into()]),
            )
            .await;

        match result {
            Err(LayerFsError::ResetFailed { failures }) => {
                let paths = failures.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>();
                assert_eq!(paths, vec!["/", "/missing"]);
            }
            other => panic!("expected ResetFailed, got {other:?}"),
        }

        assert!(overlay.stat(&"/a".into()).await.is_err());
        assert!(overlay.stat(&"/b".into()).await.is_ok());

        Ok(())
    }

    #[test]
    fn test_merge_strategy_serde_names() -> anyhow::Result<()> {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: MergeStrategy,
        }

        for (name, strategy) in [
            ("overwrite", MergeStrategy::Overwrite),
            ("preserve", MergeStrategy::Preserve),
            ("error", MergeStrategy::Error),
            ("callback", MergeStrategy::Callback),
        ] {
            let parsed: Wrapper = toml::from_str(&format!("strategy = \"{name}\""))?;
            assert_eq!(parsed.strategy, strategy);
        }

        Ok(())
    }
}
