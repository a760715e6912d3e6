use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of entry a path names in a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file
    File,

    /// Directory
    Directory,
}

/// Stats of a file or directory as reported by a storage backend.
///
/// A `FileStat` is a snapshot: it is produced on demand by a `stat` call and is never refreshed.
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters, Getters)]
pub struct FileStat {
    /// Size of the entry in bytes
    #[getset(get_copy = "pub with_prefix")]
    size: u64,

    /// When the entry was last modified
    #[getset(get = "pub with_prefix")]
    modified_at: DateTime<Utc>,

    /// Whether the entry is a file or a directory
    #[getset(get_copy = "pub with_prefix")]
    kind: EntryKind,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FileStat {
    /// Creates stats for an entry.
    pub fn new(kind: EntryKind, size: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            size,
            modified_at,
            kind,
        }
    }

    /// Creates stats for a file of the given size, modified now.
    pub fn file(size: u64) -> Self {
        Self::new(EntryKind::File, size, Utc::now())
    }

    /// Creates stats for a directory, modified now.
    pub fn directory() -> Self {
        Self::new(EntryKind::Directory, 0, Utc::now())
    }

    /// Returns `true` if the entry is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Returns `true` if the entry is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
