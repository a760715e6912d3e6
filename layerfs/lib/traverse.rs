use std::collections::VecDeque;

use futures::stream::{self, BoxStream, StreamExt};

use crate::{FileStat, LayerFsResult, StorageBackend, VirtualPath};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A file found by a [`Traversal`], with its stats if they were requested.
pub type TraversalEntry = (VirtualPath, Option<FileStat>);

/// A depth-first walk over the files of one storage backend.
///
/// The walk keeps an explicit worklist instead of recursing, so its memory use grows with the
/// width of the tree and not with the depth of the call stack. Files of a directory are yielded
/// in listing order before any of its subdirectories are entered.
///
/// Paths that disappear between being listed and being inspected are skipped. Every other backend
/// error is yielded once and the walk carries on with the next entry.
///
/// A traversal holds no state across walks: build a new one to walk again.
pub struct Traversal<'a> {
    backend: &'a dyn StorageBackend,
    recursive: bool,
    include_stats: bool,

    /// Directories waiting to be listed. The next one is at the end.
    pending: Vec<VirtualPath>,

    /// Entries of the directory being walked, waiting to be inspected.
    queued: VecDeque<VirtualPath>,

    /// Subdirectories found in the directory being walked.
    subdirs: Vec<VirtualPath>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'a> Traversal<'a> {
    /// Creates a traversal of the files under `root`.
    ///
    /// ## Arguments
    ///
    /// * `backend` - The backend to walk
    /// * `root` - The directory to start from
    /// * `recursive` - Whether to descend into subdirectories
    /// * `include_stats` - Whether to yield the stats of each file
    pub fn new(
        backend: &'a dyn StorageBackend,
        root: impl Into<VirtualPath>,
        recursive: bool,
        include_stats: bool,
    ) -> Self {
        Self {
            backend,
            recursive,
            include_stats,
            pending: vec![root.into()],
            queued: VecDeque::new(),
            subdirs: Vec::new(),
        }
    }

    /// Returns the next file of the walk, or `None` once every directory has been visited.
    pub async fn next(&mut self) -> Option<LayerFsResult<TraversalEntry>> {
        loop {
            if let Some(path) = self.queued.pop_front() {
                let stat = match self.backend.stat(&path).await {
                    Ok(stat) => stat,
                    Err(e) if e.is_not_found() => {
                        tracing::debug!("path disappeared before stat: {}", path);
                        continue;
                    }
                    Err(e) => return Some(Err(e)),
                };

                if stat.is_directory() {
                    if self.recursive {
                        self.subdirs.push(path);
                    } else {
                        tracing::trace!("not descending into {}", path);
                    }
                    continue;
                }

                let stat = self.include_stats.then_some(stat);
                return Some(Ok((path, stat)));
            }

            // Subdirectories are pushed in reverse so they are entered in listing order
            self.pending.extend(self.subdirs.drain(..).rev());
            let dir = self.pending.pop()?;

            match self.backend.readdir(&dir).await {
                Ok(names) => {
                    tracing::trace!("walking {} ({} entries)", dir, names.len());
                    self.queued = names.iter().map(|name| dir.join(name)).collect();
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!("directory disappeared during walk: {}", dir);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Turns the walk into a stream of entries.
    pub fn into_stream(self) -> BoxStream<'a, LayerFsResult<TraversalEntry>> {
        stream::unfold(self, |mut walk| async move {
            let item = walk.next().await?;
            Some((item, walk))
        })
        .boxed()
    }

    /// Runs the walk to completion, stopping at the first error.
    pub async fn collect(mut self) -> LayerFsResult<Vec<TraversalEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await {
            entries.push(entry?);
        }

        Ok(entries)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Lists every file under `root` together with its stats.
///
/// Paths that vanish during the walk are skipped. Any other error aborts the listing.
pub async fn list_files(
    backend: &dyn StorageBackend,
    root: &VirtualPath,
) -> LayerFsResult<Vec<(VirtualPath, FileStat)>> {
    let entries = Traversal::new(backend, root, true, true).collect().await?;
    Ok(entries
        .into_iter()
        .filter_map(|(path, stat)| stat.map(|stat| (path, stat)))
        .collect())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
