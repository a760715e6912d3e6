use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::{FileStat, LayerFsResult, VirtualPath};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A storage backend handle that can be shared between many operations.
pub type SharedBackend = Arc<dyn StorageBackend>;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A trait that defines the interface for the storage a layer lives on.
///
/// Every operation is atomic for a single path. Operations spanning several paths (merging,
/// materializing) are orchestrated on top of this trait and are not atomic as a whole.
///
/// Implementations report failures with the backend kinds of [`LayerFsError`](crate::LayerFsError):
/// `NotFound`, `AlreadyExists`, `NotADirectory`, `IsADirectory`, `DirectoryNotEmpty`,
/// `PermissionDenied`, `InvalidPath`, or `Backend` for anything else.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Gets the stats of a file or directory.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if the path does not exist.
    async fn stat(&self, path: &VirtualPath) -> LayerFsResult<FileStat>;

    /// Reads the full content of a file.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist
    /// - The path is a directory
    async fn read_file(&self, path: &VirtualPath) -> LayerFsResult<Bytes>;

    /// Replaces the content of a file, creating it and any missing parent directories.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The path is a directory
    /// - An ancestor of the path is a file
    async fn write_file(&self, path: &VirtualPath, content: Bytes) -> LayerFsResult<()>;

    /// Lists the names of the entries in a directory.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The path doesn't exist
    /// - The path is not a directory
    async fn readdir(&self, path: &VirtualPath) -> LayerFsResult<Vec<String>>;

    /// Removes a file.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The path doesn't exist
    /// - The path is a directory
    async fn unlink(&self, path: &VirtualPath) -> LayerFsResult<()>;

    /// Creates a directory along with any missing parent directories.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - Something already exists at the path
    /// - An ancestor of the path is a file
    async fn mkdir(&self, path: &VirtualPath) -> LayerFsResult<()>;

    /// Removes an empty directory.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The path doesn't exist or is the root
    /// - The path is not a directory
    /// - The directory is not empty
    async fn rmdir(&self, path: &VirtualPath) -> LayerFsResult<()>;

    /// Reads a file as a stream of chunks of at most `chunk_size` bytes.
    ///
    /// The default implementation reads the whole file and slices it; backends that can read
    /// incrementally should override it.
    async fn read_stream(
        &self,
        path: &VirtualPath,
        chunk_size: usize,
    ) -> LayerFsResult<BoxStream<'static, LayerFsResult<Bytes>>> {
        let content = self.read_file(path).await?;
        let chunk_size = chunk_size.max(1);
        let chunks = (0..content.len())
            .step_by(chunk_size)
            .map(|start| {
                let end = (start + chunk_size).min(content.len());
                Ok(content.slice(start..end))
            })
            .collect::<Vec<_>>();

        Ok(stream::iter(chunks).boxed())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Stats a path, mapping `NotFound` to `None`.
pub(crate) async fn stat_opt(
    backend: &dyn StorageBackend,
    path: &VirtualPath,
) -> LayerFsResult<Option<FileStat>> {
    match backend.stat(path).await {
        Ok(stat) => Ok(Some(stat)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads a file, mapping `NotFound` to `None`.
pub(crate) async fn read_opt(
    backend: &dyn StorageBackend,
    path: &VirtualPath,
) -> LayerFsResult<Option<Bytes>> {
    match backend.read_file(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
