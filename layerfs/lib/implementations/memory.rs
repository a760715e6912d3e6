use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use getset::Getters;
use tokio::sync::RwLock;

use crate::{EntryKind, FileStat, LayerFsError, LayerFsResult, StorageBackend, VirtualPath};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory implementation of a storage backend.
///
/// This implementation stores all files and directories in memory, making it useful for
/// testing and for scratch layers that don't need persistence. Cloning the backend yields another
/// handle to the same tree.
#[derive(Debug, Clone, Default, Getters)]
#[getset(get = "pub with_prefix")]
pub struct MemoryBackend {
    /// The root directory of the tree
    root_dir: Arc<RwLock<Dir>>,
}

/// Represents a directory in the memory backend.
///
/// Entries are kept sorted by name so listings come back in lexical order.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Dir {
    /// When the directory was last modified
    modified_at: DateTime<Utc>,

    /// Map of names to directory entries
    entries: BTreeMap<String, Entity>,
}

/// Represents a file in the memory backend.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct File {
    /// When the file was last modified
    modified_at: DateTime<Utc>,

    /// Content of the file
    content: Bytes,
}

/// Represents an entity in the memory backend.
#[derive(Debug, Clone)]
pub enum Entity {
    /// A directory containing other entities
    Dir(Dir),

    /// A file containing data
    File(File),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryBackend {
    /// Creates a new empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a memory backend pre-populated with the given files.
    ///
    /// Parent directories are created as needed.
    pub async fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> LayerFsResult<Self>
    where
        P: Into<VirtualPath>,
        C: Into<Bytes>,
    {
        let backend = Self::new();
        for (path, content) in files {
            backend.write_file(&path.into(), content.into()).await?;
        }

        Ok(backend)
    }

    /// Returns the parent directory of `path`, creating missing directories on the way.
    fn parent_dir_creating<'a>(
        root: &'a mut Dir,
        path: &VirtualPath,
    ) -> LayerFsResult<&'a mut Dir> {
        let segments = path.segments().collect::<Vec<_>>();
        let mut current = root;
        let mut walked = VirtualPath::root();

        for segment in &segments[..segments.len().saturating_sub(1)] {
            walked = walked.join(segment);
            let entity = current
                .entries
                .entry(segment.to_string())
                .or_insert_with(|| Entity::Dir(Dir::new()));

            current = match entity {
                Entity::Dir(dir) => dir,
                Entity::File(_) => return Err(LayerFsError::NotADirectory(walked)),
            };
        }

        Ok(current)
    }

    /// Returns the parent directory of `path` without creating anything.
    fn parent_dir_mut<'a>(root: &'a mut Dir, path: &VirtualPath) -> LayerFsResult<&'a mut Dir> {
        match path.parent() {
            Some(parent) if !parent.is_root() => match root.find_mut(&parent)? {
                Some(Entity::Dir(dir)) => Ok(dir),
                Some(Entity::File(_)) => Err(LayerFsError::NotADirectory(parent)),
                None => Err(LayerFsError::NotFound(path.clone())),
            },
            _ => Ok(root),
        }
    }
}

impl File {
    /// Creates a new file with the given content.
    pub fn with_content(content: Bytes) -> Self {
        Self {
            modified_at: Utc::now(),
            content,
        }
    }
}

impl Entity {
    /// Returns the stats of this entity.
    pub fn stat(&self) -> FileStat {
        match self {
            Entity::Dir(dir) => FileStat::new(EntryKind::Directory, 0, dir.modified_at),
            Entity::File(file) => {
                FileStat::new(EntryKind::File, file.content.len() as u64, file.modified_at)
            }
        }
    }
}

impl Dir {
    /// Creates a new empty directory.
    pub fn new() -> Self {
        Self {
            modified_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    /// Traverses a path starting from this directory to find an entity.
    ///
    /// ## Returns
    ///
    /// * `Ok(Some(&Entity))` - A reference to the found entity
    /// * `Ok(None)` - If the path doesn't exist
    /// * `Err(LayerFsError::NotADirectory)` - If a non-final segment is a file
    ///
    /// The root path itself is not an entity and yields `Ok(None)`.
    pub fn find(&self, path: &VirtualPath) -> LayerFsResult<Option<&Entity>> {
        let mut segments = path.segments().peekable();
        let mut current_dir = self;
        let mut walked = VirtualPath::root();

        while let Some(segment) = segments.next() {
            let entry = current_dir.entries.get(segment);

            // If this is the last segment, return the entry
            if segments.peek().is_none() {
                return Ok(entry);
            }

            walked = walked.join(segment);
            match entry {
                Some(Entity::Dir(dir)) => current_dir = dir,
                Some(Entity::File(_)) => return Err(LayerFsError::NotADirectory(walked)),
                None => return Ok(None),
            }
        }

        Ok(None)
    }

    /// Traverses a path starting from this directory to find an entity, returning a mutable
    /// reference. Follows the same rules as [`Dir::find`].
    pub fn find_mut(&mut self, path: &VirtualPath) -> LayerFsResult<Option<&mut Entity>> {
        let mut segments = path.segments().peekable();
        let mut current_dir = self;
        let mut walked = VirtualPath::root();

        while let Some(segment) = segments.next() {
            let entry = current_dir.entries.get_mut(segment);

            if segments.peek().is_none() {
                return Ok(entry);
            }

            walked = walked.join(segment);
            match entry {
                Some(Entity::Dir(dir)) => current_dir = dir,
                Some(Entity::File(_)) => return Err(LayerFsError::NotADirectory(walked)),
                None => return Ok(None),
            }
        }

        Ok(None)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn stat(&self, path: &VirtualPath) -> LayerFsResult<FileStat> {
        let root = self.root_dir.read().await;
        if path.is_root() {
            return Ok(FileStat::new(EntryKind::Directory, 0, root.modified_at));
        }

        root.find(path)?
            .map(Entity::stat)
            .ok_or_else(|| LayerFsError::NotFound(path.clone()))
    }

    async fn read_file(&self, path: &VirtualPath) -> LayerFsResult<Bytes> {
        if path.is_root() {
            return Err(LayerFsError::IsADirectory(path.clone()));
        }

        let root = self.root_dir.read().await;
        match root.find(path)? {
            Some(Entity::File(file)) => Ok(file.content.clone()),
            Some(Entity::Dir(_)) => Err(LayerFsError::IsADirectory(path.clone())),
            None => Err(LayerFsError::NotFound(path.clone())),
        }
    }

    async fn write_file(&self, path: &VirtualPath, content: Bytes) -> LayerFsResult<()> {
        let name = path
            .file_name()
            .ok_or_else(|| LayerFsError::IsADirectory(path.clone()))?;

        let mut root = self.root_dir.write().await;
        let parent_dir = MemoryBackend::parent_dir_creating(&mut root, path)?;

        if let Some(Entity::Dir(_)) = parent_dir.entries.get(name) {
            return Err(LayerFsError::IsADirectory(path.clone()));
        }

        parent_dir
            .entries
            .insert(name.to_string(), Entity::File(File::with_content(content)));
        parent_dir.modified_at = Utc::now();

        Ok(())
    }

    async fn readdir(&self, path: &VirtualPath) -> LayerFsResult<Vec<String>> {
        let root = self.root_dir.read().await;
        let dir = if path.is_root() {
            &*root
        } else {
            match root.find(path)? {
                Some(Entity::Dir(dir)) => dir,
                Some(Entity::File(_)) => return Err(LayerFsError::NotADirectory(path.clone())),
                None => return Err(LayerFsError::NotFound(path.clone())),
            }
        };

        Ok(dir.entries.keys().cloned().collect())
    }

    async fn unlink(&self, path: &VirtualPath) -> LayerFsResult<()> {
        let name = path
            .file_name()
            .ok_or_else(|| LayerFsError::InvalidPath(path.clone()))?;

        let mut root = self.root_dir.write().await;
        let parent_dir = MemoryBackend::parent_dir_mut(&mut root, path)?;

        match parent_dir.entries.get(name) {
            Some(Entity::File(_)) => {
                parent_dir.entries.remove(name);
                parent_dir.modified_at = Utc::now();
                Ok(())
            }
            Some(Entity::Dir(_)) => Err(LayerFsError::IsADirectory(path.clone())),
            None => Err(LayerFsError::NotFound(path.clone())),
        }
    }

    async fn mkdir(&self, path: &VirtualPath) -> LayerFsResult<()> {
        let name = path
            .file_name()
            .ok_or_else(|| LayerFsError::AlreadyExists(path.clone()))?;

        let mut root = self.root_dir.write().await;
        let parent_dir = MemoryBackend::parent_dir_creating(&mut root, path)?;

        if parent_dir.entries.contains_key(name) {
            return Err(LayerFsError::AlreadyExists(path.clone()));
        }

        parent_dir
            .entries
            .insert(name.to_string(), Entity::Dir(Dir::new()));
        parent_dir.modified_at = Utc::now();

        Ok(())
    }

    async fn rmdir(&self, path: &VirtualPath) -> LayerFsResult<()> {
        let name = path
            .file_name()
            .ok_or_else(|| LayerFsError::InvalidPath(path.clone()))?;

        let mut root = self.root_dir.write().await;
        let parent_dir = MemoryBackend::parent_dir_mut(&mut root, path)?;

        match parent_dir.entries.get(name) {
            Some(Entity::Dir(dir)) if !dir.entries.is_empty() => {
                Err(LayerFsError::DirectoryNotEmpty(path.clone()))
            }
            Some(Entity::Dir(_)) => {
                parent_dir.entries.remove(name);
                parent_dir.modified_at = Utc::now();
                Ok(())
            }
            Some(Entity::File(_)) => Err(LayerFsError::NotADirectory(path.clone())),
            None => Err(LayerFsError::NotFound(path.clone())),
        }
    }
}

impl Default for Dir {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
