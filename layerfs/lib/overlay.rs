use std::collections::BTreeMap;

use async_recursion::async_recursion;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::{
    ErrorCode, FileEntry, FileStat, LayerFsError, LayerFsResult, QueryOptions, SharedBackend,
    StorageBackend, Traversal, TraversalEntry, View, ViewQuery, VirtualPath,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A writable overlay stacked on an optional read-only base.
///
/// Reads and stats look at the overlay first and fall through to the base only when the overlay
/// reports the path as missing. Any other error from the overlay is returned as is. Writes and
/// removals only ever touch the overlay.
///
/// The accessor keeps no cache. Every call goes to the backends, so callers always observe the
/// latest writes made through any handle to the same backend.
///
/// ## Examples
///
/// ```
/// use std::sync::Arc;
/// use layerfs::{MemoryBackend, OverlayAccessor};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let base = MemoryBackend::with_files([("/config.toml", "debug = false")]).await?;
/// let overlay = OverlayAccessor::new(Arc::new(MemoryBackend::new()), Some(Arc::new(base)));
///
/// assert_eq!(overlay.read_text("/config.toml").await?, "debug = false");
///
/// overlay.write("/config.toml", "debug = true").await?;
/// assert_eq!(overlay.read_text("/config.toml").await?, "debug = true");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OverlayAccessor {
    overlay: SharedBackend,
    base: Option<SharedBackend>,
}

/// A nested listing of a directory.
///
/// Files are leaves. Directories below the depth limit of a [`OverlayAccessor::tree`] call are
/// empty directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirTree {
    /// A file.
    File,

    /// A directory and its entries by name.
    Dir(BTreeMap<String, DirTree>),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayAccessor {
    /// Creates an accessor over `overlay`, falling through to `base` if given.
    pub fn new(overlay: SharedBackend, base: Option<SharedBackend>) -> Self {
        Self { overlay, base }
    }

    /// Returns the overlay backend.
    pub fn get_overlay(&self) -> &SharedBackend {
        &self.overlay
    }

    /// Returns the base backend, if any.
    pub fn get_base(&self) -> Option<&SharedBackend> {
        self.base.as_ref()
    }

    /// Reads a file, falling through to the base if the overlay does not have it.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if neither layer has the file, or the overlay's error if it failed for
    /// any other reason.
    pub async fn read(&self, path: impl Into<VirtualPath>) -> LayerFsResult<Bytes> {
        let path = path.into();
        match self.overlay.read_file(&path).await {
            Err(e) if e.is_not_found() => match &self.base {
                Some(base) => {
                    tracing::trace!("falling through to base for read of {}", path);
                    base.read_file(&path).await
                }
                None => Err(e),
            },
            result => result,
        }
    }

    /// Reads a file as UTF-8 text.
    pub async fn read_text(&self, path: impl Into<VirtualPath>) -> LayerFsResult<String> {
        let path = path.into();
        let content = self.read(path.clone()).await?;
        String::from_utf8(content.to_vec()).map_err(|e| LayerFsError::Backend {
            path,
            code: ErrorCode::InvalidArgument,
            message: format!("file is not valid utf-8: {e}"),
        })
    }

    /// Writes a file to the overlay. Missing parent directories are created by the backend.
    pub async fn write(
        &self,
        path: impl Into<VirtualPath>,
        content: impl Into<Bytes>,
    ) -> LayerFsResult<()> {
        self.overlay.write_file(&path.into(), content.into()).await
    }

    /// Returns `true` if the path exists on the overlay or the base.
    ///
    /// ## Errors
    ///
    /// Errors other than `NotFound` are returned rather than treated as absence.
    pub async fn exists(&self, path: impl Into<VirtualPath>) -> LayerFsResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Gets the stats of a path, falling through to the base if the overlay does not have it.
    pub async fn stat(&self, path: impl Into<VirtualPath>) -> LayerFsResult<FileStat> {
        let path = path.into();
        match self.overlay.stat(&path).await {
            Err(e) if e.is_not_found() => match &self.base {
                Some(base) => {
                    tracing::trace!("falling through to base for stat of {}", path);
                    base.stat(&path).await
                }
                None => Err(e),
            },
            result => result,
        }
    }

    /// Lists the entry names of a directory on the overlay.
    pub async fn list(&self, path: impl Into<VirtualPath>) -> LayerFsResult<Vec<String>> {
        self.overlay.readdir(&path.into()).await
    }

    /// Removes a file from the overlay.
    pub async fn remove(&self, path: impl Into<VirtualPath>) -> LayerFsResult<()> {
        self.overlay.unlink(&path.into()).await
    }

    /// Walks the files of the overlay under `root`.
    pub fn traverse(
        &self,
        root: impl Into<VirtualPath>,
        recursive: bool,
        include_stats: bool,
    ) -> BoxStream<'_, LayerFsResult<TraversalEntry>> {
        Traversal::new(&*self.overlay, root, recursive, include_stats).into_stream()
    }

    /// Returns the overlay paths matching a glob pattern.
    pub async fn search(&self, pattern: &str, recursive: bool) -> LayerFsResult<Vec<VirtualPath>> {
        let query = ViewQuery::new(
            QueryOptions::builder()
                .path_pattern(pattern)
                .recursive(recursive)
                .include_stats(false)
                .build(),
        )?;

        let entries = self.view(query).load().await?;
        Ok(entries.into_iter().map(|e| e.get_path().clone()).collect())
    }

    /// Runs a query against the overlay.
    pub async fn query(&self, query: &ViewQuery) -> LayerFsResult<Vec<FileEntry>> {
        self.view(query.clone()).load().await
    }

    /// Returns a view of the overlay filtered by `query`.
    pub fn view(&self, query: ViewQuery) -> View {
        View::new(self.overlay.clone(), query)
    }

    /// Builds a nested listing of the overlay under `path`.
    ///
    /// With `max_depth` set, directories at that depth are listed as empty. A missing directory
    /// yields an empty listing; any other error is returned.
    pub async fn tree(
        &self,
        path: impl Into<VirtualPath>,
        max_depth: Option<usize>,
    ) -> LayerFsResult<DirTree> {
        build_tree(&*self.overlay, &path.into(), 0, max_depth).await
    }
}

impl DirTree {
    /// Returns the entries of a directory, or `None` for a file.
    pub fn entries(&self) -> Option<&BTreeMap<String, DirTree>> {
        match self {
            DirTree::File => None,
            DirTree::Dir(entries) => Some(entries),
        }
    }

    /// Returns `true` if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, DirTree::File)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

#[async_recursion]
async fn build_tree(
    backend: &dyn StorageBackend,
    path: &VirtualPath,
    depth: usize,
    max_depth: Option<usize>,
) -> LayerFsResult<DirTree> {
    let mut entries = BTreeMap::new();
    if max_depth.is_some_and(|max| depth >= max) {
        return Ok(DirTree::Dir(entries));
    }

    let names = match backend.readdir(path).await {
        Ok(names) => names,
        Err(e) if e.is_not_found() => return Ok(DirTree::Dir(entries)),
        Err(e) => return Err(e),
    };

    for name in names {
        let child = path.join(&name);
        let stat = match backend.stat(&child).await {
            Ok(stat) => stat,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };

        let node = if stat.is_directory() {
            build_tree(backend, &child, depth + 1, max_depth).await?
        } else {
            DirTree::File
        };
        entries.insert(name, node);
    }

    Ok(DirTree::Dir(entries))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use futures::TryStreamExt;

    use super::*;
    use crate::MemoryBackend;

    /// A backend that refuses every operation.
    struct DeniedBackend;

    #[async_trait]
    impl StorageBackend for DeniedBackend {
        async fn stat(&self, path: &VirtualPath) -> LayerFsResult<FileStat> {
            Err(LayerFsError::PermissionDenied(path.clone()))
        }

        async fn read_file(&self, path: &VirtualPath) -> LayerFsResult<Bytes> {
            Err(LayerFsError::PermissionDenied(path.clone()))
        }

        async fn write_file(&self, path: &VirtualPath, _: Bytes) -> LayerFsResult<()> {
            Err(LayerFsError::PermissionDenied(path.clone()))
        }

        async fn readdir(&self, path: &VirtualPath) -> LayerFsResult<Vec<String>> {
            Err(LayerFsError::PermissionDenied(path.clone()))
        }

        async fn unlink(&self, path: &VirtualPath) -> LayerFsResult<()> {
            Err(LayerFsError::PermissionDenied(path.clone()))
        }

        async fn mkdir(&self, path: &VirtualPath) -> LayerFsResult<()> {
            Err(LayerFsError::PermissionDenied(path.clone()))
        }

        async fn rmdir(&self, path: &VirtualPath) -> LayerFsResult<()> {
            Err(LayerFsError::PermissionDenied(path.clone()))
        }
    }

    async fn layers() -> anyhow::Result<(Arc<MemoryBackend>, Arc<MemoryBackend>, OverlayAccessor)> {
        let overlay = Arc::new(MemoryBackend::with_files([("/shadowed.txt", "overlay")]).await?);
        let base = Arc::new(
            MemoryBackend::with_files([("/shadowed.txt", "base"), ("/base_only.txt", "from base")])
                .await?,
        );
        let accessor = OverlayAccessor::new(overlay.clone(), Some(base.clone()));
        Ok((overlay, base, accessor))
    }

    #[tokio::test]
    async fn test_overlay_read_falls_through_to_base() -> anyhow::Result<()> {
        let (_, _, accessor) = layers().await?;

        assert_eq!(accessor.read("/base_only.txt").await?, "from base");
        assert_eq!(accessor.read("/shadowed.txt").await?, "overlay");
        assert_eq!(accessor.read_text("base_only.txt").await?, "from base");
        assert!(accessor.stat("/base_only.txt").await?.is_file());
        assert!(matches!(
            accessor.read("/nowhere").await,
            Err(LayerFsError::NotFound(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_overlay_write_never_touches_base() -> anyhow::Result<()> {
        let (overlay, base, accessor) = layers().await?;
        accessor.write("/base_only.txt", "changed").await?;

        assert_eq!(accessor.read("/base_only.txt").await?, "changed");
        assert_eq!(overlay.read_file(&"/base_only.txt".into()).await?, "changed");

        let base_view = OverlayAccessor::new(base, None);
        assert_eq!(base_view.read("/base_only.txt").await?, "from base");

        Ok(())
    }

    #[tokio::test]
    async fn test_overlay_remove_reveals_base() -> anyhow::Result<()> {
        let (_, _, accessor) = layers().await?;
        accessor.remove("/shadowed.txt").await?;

        assert_eq!(accessor.read("/shadowed.txt").await?, "base");
        assert!(accessor.remove("/base_only.txt").await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_overlay_errors_other_than_not_found_do_not_fall_through() -> anyhow::Result<()> {
        let base = Arc::new(MemoryBackend::with_files([("/f", "base")]).await?);
        let accessor = OverlayAccessor::new(Arc::new(DeniedBackend), Some(base));

        assert!(matches!(
            accessor.read("/f").await,
            Err(LayerFsError::PermissionDenied(_))
        ));
        assert!(matches!(
            accessor.exists("/f").await,
            Err(LayerFsError::PermissionDenied(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_overlay_exists() -> anyhow::Result<()> {
        let (_, _, accessor) = layers().await?;

        assert!(accessor.exists("/shadowed.txt").await?);
        assert!(accessor.exists("/base_only.txt").await?);
        assert!(!accessor.exists("/missing.txt").await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_overlay_read_text_rejects_binary() -> anyhow::Result<()> {
        let (_, _, accessor) = layers().await?;
        accessor.write("/bin", vec![0xffu8, 0xfe]).await?;

        let error = accessor.read_text("/bin").await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidArgument);
        assert_eq!(error.path(), Some(&VirtualPath::from("/bin")));

        Ok(())
    }

    #[tokio::test]
    async fn test_overlay_traverse_search_and_query() -> anyhow::Result<()> {
        let accessor = OverlayAccessor::new(
            Arc::new(
                MemoryBackend::with_files([
                    ("/a.py", "print(1)"),
                    ("/pkg/b.py", "print(2)"),
                    ("/pkg/c.txt", "text"),
                ])
                .await?,
            ),
            None,
        );

        let mut walked = accessor
            .traverse("/", true, false)
            .map_ok(|(path, _)| path.to_string())
            .try_collect::<Vec<_>>()
            .await?;
        walked.sort();
        assert_eq!(walked, vec!["/a.py", "/pkg/b.py", "/pkg/c.txt"]);

        let mut found = accessor.search("*.py", true).await?;
        found.sort();
        assert_eq!(found, vec![VirtualPath::from("/a.py"), VirtualPath::from("/pkg/b.py")]);
        assert_eq!(accessor.search("*.py", false).await?, vec![VirtualPath::from("/a.py")]);

        let query = ViewQuery::new(
            QueryOptions::builder()
                .path_pattern("pkg/*")
                .include_content(true)
                .build(),
        )?;
        let entries = accessor.query(&query).await?;
        let mut contents = entries
            .iter()
            .map(|e| e.get_content().clone().unwrap_or_default())
            .collect::<Vec<_>>();
        contents.sort();
        assert_eq!(contents, vec![Bytes::from("print(2)"), Bytes::from("text")]);

        Ok(())
    }

    #[tokio::test]
    async fn test_overlay_tree_respects_depth() -> anyhow::Result<()> {
        let accessor = OverlayAccessor::new(
            Arc::new(MemoryBackend::with_files([("/top.txt", "t"), ("/a/b/c.txt", "c")]).await?),
            None,
        );

        let tree = accessor.tree("/", None).await?;
        let root = tree.entries().unwrap();
        assert!(root["top.txt"].is_file());
        let a = root["a"].entries().unwrap();
        assert!(a["b"].entries().unwrap()["c.txt"].is_file());

        let shallow = accessor.tree("/", Some(1)).await?;
        assert_eq!(
            shallow.entries().unwrap()["a"],
            DirTree::Dir(BTreeMap::new())
        );

        assert_eq!(
            accessor.tree("/missing", None).await?,
            DirTree::Dir(BTreeMap::new())
        );

        Ok(())
    }
}
