use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;

use crate::{
    EntryKind, ErrorCode, FileStat, LayerFsError, LayerFsResult, StorageBackend, VirtualPath,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A storage backend that uses the native filesystem.
///
/// This implementation provides direct access to the underlying filesystem, rooted at a specific
/// directory. All operations are performed relative to this root directory, so `/` maps to the
/// root directory itself.
///
/// Symlinks are never followed into directories. A symlink resolving to a regular file is
/// listed and read as that file. Any other symlink is left out of listings, and a direct stat
/// reports it as a file so it is never walked into.
#[derive(Debug, Clone)]
pub struct NativeBackend {
    /// The root directory for this backend instance
    root_path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NativeBackend {
    /// Creates a new native backend with the given root path.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    /// Returns the directory this backend is rooted at.
    pub fn get_root_path(&self) -> &Path {
        &self.root_path
    }

    /// Converts a virtual path to a native filesystem path.
    fn to_native_path(&self, path: &VirtualPath) -> PathBuf {
        path.to_native(&self.root_path)
    }

    /// Gets metadata for a path without following a final symlink.
    ///
    /// The root is the one path that is resolved, so a backend may be rooted at a symlink.
    async fn metadata_checked(&self, path: &VirtualPath) -> LayerFsResult<std::fs::Metadata> {
        let native_path = self.to_native_path(path);
        let metadata = if path.is_root() {
            tokio::fs::metadata(native_path).await
        } else {
            tokio::fs::symlink_metadata(native_path).await
        };

        metadata.map_err(|e| map_io_error(path, e))
    }

    /// Like [`metadata_checked`](Self::metadata_checked), but `None` if the path is absent.
    async fn metadata_opt(&self, path: &VirtualPath) -> LayerFsResult<Option<std::fs::Metadata>> {
        match self.metadata_checked(path).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns `true` if a symlink at `native_path` resolves to a regular file.
async fn links_to_file(native_path: &Path) -> bool {
    tokio::fs::metadata(native_path)
        .await
        .is_ok_and(|target| target.is_file())
}

/// Translates an IO error into the backend error kind for `path`.
fn map_io_error(path: &VirtualPath, error: io::Error) -> LayerFsError {
    LayerFsError::from_code(ErrorCode::from(error.kind()), path.clone(), error.to_string())
}

fn to_file_stat(metadata: &std::fs::Metadata) -> FileStat {
    let modified_at = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    if metadata.is_dir() {
        FileStat::new(EntryKind::Directory, 0, modified_at)
    } else {
        FileStat::new(EntryKind::File, metadata.len(), modified_at)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl StorageBackend for NativeBackend {
    async fn stat(&self, path: &VirtualPath) -> LayerFsResult<FileStat> {
        let metadata = self.metadata_checked(path).await?;
        if metadata.file_type().is_symlink() {
            if let Ok(target) = tokio::fs::metadata(self.to_native_path(path)).await {
                if target.is_file() {
                    return Ok(to_file_stat(&target));
                }
            }
        }

        Ok(to_file_stat(&metadata))
    }

    async fn read_file(&self, path: &VirtualPath) -> LayerFsResult<Bytes> {
        let metadata = self.metadata_checked(path).await?;
        if metadata.is_dir() {
            return Err(LayerFsError::IsADirectory(path.clone()));
        }

        tokio::fs::read(self.to_native_path(path))
            .await
            .map(Bytes::from)
            .map_err(|e| map_io_error(path, e))
    }

    async fn write_file(&self, path: &VirtualPath, content: Bytes) -> LayerFsResult<()> {
        if path.is_root() {
            return Err(LayerFsError::IsADirectory(path.clone()));
        }

        let native_path = self.to_native_path(path);
        if let Some(metadata) = self.metadata_opt(path).await? {
            if metadata.is_dir() {
                return Err(LayerFsError::IsADirectory(path.clone()));
            }
        }

        if let Some(parent) = native_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_error(path, e))?;
        }

        tokio::fs::write(&native_path, &content)
            .await
            .map_err(|e| map_io_error(path, e))
    }

    async fn readdir(&self, path: &VirtualPath) -> LayerFsResult<Vec<String>> {
        let metadata = self.metadata_checked(path).await?;
        if !metadata.is_dir() {
            return Err(LayerFsError::NotADirectory(path.clone()));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(self.to_native_path(path))
            .await
            .map_err(|e| map_io_error(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| map_io_error(path, e))? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                tracing::warn!("skipping non utf-8 name in {}: {:?}", path, file_name);
                continue;
            };

            // A virtual path would read `\` as a separator
            if name.contains('\\') {
                tracing::warn!("skipping name containing a backslash in {}: {}", path, name);
                continue;
            }

            let file_type = entry.file_type().await.map_err(|e| map_io_error(path, e))?;
            if file_type.is_symlink() && !links_to_file(&entry.path()).await {
                tracing::warn!("skipping symlink that is not a file: {}", path.join(name));
                continue;
            }

            entries.push(name.to_string());
        }

        entries.sort();
        Ok(entries)
    }

    async fn unlink(&self, path: &VirtualPath) -> LayerFsResult<()> {
        if path.is_root() {
            return Err(LayerFsError::InvalidPath(path.clone()));
        }

        let metadata = self.metadata_checked(path).await?;
        if metadata.is_dir() {
            return Err(LayerFsError::IsADirectory(path.clone()));
        }

        tokio::fs::remove_file(self.to_native_path(path))
            .await
            .map_err(|e| map_io_error(path, e))
    }

    async fn mkdir(&self, path: &VirtualPath) -> LayerFsResult<()> {
        if self.metadata_opt(path).await?.is_some() {
            return Err(LayerFsError::AlreadyExists(path.clone()));
        }

        let native_path = self.to_native_path(path);

        tokio::fs::create_dir_all(native_path)
            .await
            .map_err(|e| map_io_error(path, e))
    }

    async fn rmdir(&self, path: &VirtualPath) -> LayerFsResult<()> {
        if path.is_root() {
            return Err(LayerFsError::InvalidPath(path.clone()));
        }

        let metadata = self.metadata_checked(path).await?;
        if !metadata.is_dir() {
            return Err(LayerFsError::NotADirectory(path.clone()));
        }

        let native_path = self.to_native_path(path);
        let mut dir = tokio::fs::read_dir(&native_path)
            .await
            .map_err(|e| map_io_error(path, e))?;
        if dir
            .next_entry()
            .await
            .map_err(|e| map_io_error(path, e))?
            .is_some()
        {
            return Err(LayerFsError::DirectoryNotEmpty(path.clone()));
        }

        tokio::fs::remove_dir(native_path)
            .await
            .map_err(|e| map_io_error(path, e))
    }

    async fn read_stream(
        &self,
        path: &VirtualPath,
        chunk_size: usize,
    ) -> LayerFsResult<BoxStream<'static, LayerFsResult<Bytes>>> {
        let metadata = self.metadata_checked(path).await?;
        if metadata.is_dir() {
            return Err(LayerFsError::IsADirectory(path.clone()));
        }

        let file = tokio::fs::File::open(self.to_native_path(path))
            .await
            .map_err(|e| map_io_error(path, e))?;

        let path = path.clone();
        Ok(ReaderStream::with_capacity(file, chunk_size.max(1))
            .map_err(move |e| map_io_error(&path, e))
            .boxed())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn p(path: &str) -> VirtualPath {
        VirtualPath::from(path)
    }

    #[tokio::test]
    async fn test_native_write_read_roundtrip_creates_parents() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let backend = NativeBackend::new(temp.path());

        backend
            .write_file(&p("/nested/dir/file.txt"), Bytes::from("content"))
            .await?;

        assert!(temp.path().join("nested/dir/file.txt").exists());
        assert_eq!(backend.read_file(&p("/nested/dir/file.txt")).await?, "content");

        let stat = backend.stat(&p("/nested/dir/file.txt")).await?;
        assert!(stat.is_file());
        assert_eq!(stat.get_size(), 7);
        assert!(backend.stat(&p("/nested")).await?.is_directory());

        Ok(())
    }

    #[tokio::test]
    async fn test_native_errors_are_typed() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let backend = NativeBackend::new(temp.path());
        backend.write_file(&p("/dir/f"), Bytes::from("x")).await?;

        assert!(matches!(
            backend.stat(&p("/missing")).await,
            Err(LayerFsError::NotFound(_))
        ));
        assert!(matches!(
            backend.read_file(&p("/dir")).await,
            Err(LayerFsError::IsADirectory(_))
        ));
        assert!(matches!(
            backend.readdir(&p("/dir/f")).await,
            Err(LayerFsError::NotADirectory(_))
        ));
        assert!(matches!(
            backend.rmdir(&p("/dir")).await,
            Err(LayerFsError::DirectoryNotEmpty(_))
        ));
        assert!(matches!(
            backend.unlink(&VirtualPath::root()).await,
            Err(LayerFsError::InvalidPath(_))
        ));
        assert!(matches!(
            backend.mkdir(&p("/dir")).await,
            Err(LayerFsError::AlreadyExists(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_native_readdir_sorted() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let backend = NativeBackend::new(temp.path());
        for name in ["/zeta", "/alpha", "/mid/x"] {
            backend.write_file(&p(name), Bytes::from("x")).await?;
        }

        assert_eq!(
            backend.readdir(&VirtualPath::root()).await?,
            vec!["alpha", "mid", "zeta"]
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_native_read_stream_yields_all_bytes() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let backend = NativeBackend::new(temp.path());
        let content = (0..10_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        backend
            .write_file(&p("/blob"), Bytes::from(content.clone()))
            .await?;

        let chunks: Vec<Bytes> = backend
            .read_stream(&p("/blob"), 1024)
            .await?
            .try_collect()
            .await?;
        assert!(chunks.iter().all(|c| c.len() <= 1024));
        assert_eq!(chunks.concat(), content);

        Ok(())
    }

    #[tokio::test]
    async fn test_native_unlink_and_rmdir() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let backend = NativeBackend::new(temp.path());
        backend.write_file(&p("/d/f"), Bytes::from("x")).await?;

        backend.unlink(&p("/d/f")).await?;
        backend.rmdir(&p("/d")).await?;
        assert!(backend.readdir(&VirtualPath::root()).await?.is_empty());

        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_native_symlink_cycle_is_not_walked() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        std::fs::write(temp.path().join("f.txt"), "content")?;
        std::os::unix::fs::symlink(".", temp.path().join("loop"))?;
        std::os::unix::fs::symlink("f.txt", temp.path().join("link.txt"))?;
        std::os::unix::fs::symlink("missing", temp.path().join("dangling"))?;
        let backend = NativeBackend::new(temp.path());

        assert_eq!(
            backend.readdir(&VirtualPath::root()).await?,
            vec!["f.txt", "link.txt"]
        );

        let files = crate::list_files(&backend, &VirtualPath::root())
            .await?
            .into_iter()
            .map(|(path, stat)| (path.to_string(), stat.get_size()))
            .collect::<Vec<_>>();
        assert_eq!(
            files,
            vec![("/f.txt".to_string(), 7), ("/link.txt".to_string(), 7)]
        );

        assert!(backend.stat(&p("/loop")).await?.is_file());
        assert!(matches!(
            backend.readdir(&p("/loop")).await,
            Err(LayerFsError::NotADirectory(_))
        ));
        assert_eq!(backend.read_file(&p("/link.txt")).await?, "content");

        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_native_readdir_skips_backslash_names() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        std::fs::write(temp.path().join("a\\b"), "x")?;
        std::fs::write(temp.path().join("plain"), "y")?;
        let backend = NativeBackend::new(temp.path());

        assert_eq!(backend.readdir(&VirtualPath::root()).await?, vec!["plain"]);

        Ok(())
    }
}
