use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use chrono::{Duration, Utc};
use getset::Getters;

use crate::{
    backend::read_opt, FileStat, LayerFsError, LayerFsResult, QueryOptions, SharedBackend,
    Traversal, ViewQuery, VirtualPath, NO_EXTENSION_GROUP,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A file returned by a query.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct FileEntry {
    /// The path of the file.
    path: VirtualPath,

    /// The stats of the file, if the query kept them.
    stats: Option<FileStat>,

    /// The content of the file, if the query loaded it.
    content: Option<Bytes>,
}

/// One match found by a content search.
///
/// Offsets are byte offsets into the untrimmed line.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SearchMatch {
    /// The file the match was found in.
    file: VirtualPath,

    /// The line number, starting at 1.
    line: usize,

    /// The matching line with surrounding whitespace trimmed.
    text: String,

    /// The column the match starts at.
    column: usize,

    /// The offset where the match starts.
    match_start: usize,

    /// The offset where the match ends.
    match_end: usize,
}

/// A queried view over the files of one layer.
///
/// A view only holds the query; every method walks the backend again, so results always reflect
/// the latest writes.
#[derive(Clone)]
pub struct View {
    backend: SharedBackend,
    query: ViewQuery,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FileEntry {
    /// Creates a new file entry.
    pub fn new(path: VirtualPath, stats: Option<FileStat>, content: Option<Bytes>) -> Self {
        Self {
            path,
            stats,
            content,
        }
    }

    /// Returns the size of the file if its stats are present.
    pub fn size(&self) -> Option<u64> {
        self.stats.as_ref().map(FileStat::get_size)
    }
}

impl View {
    /// Creates a view over `backend` filtered by `query`.
    pub fn new(backend: SharedBackend, query: ViewQuery) -> Self {
        Self { backend, query }
    }

    /// Returns the query of this view.
    pub fn get_query(&self) -> &ViewQuery {
        &self.query
    }

    /// Loads every file matching the query.
    ///
    /// The walk starts at `/`. Paths that disappear while loading are skipped.
    pub async fn load(&self) -> LayerFsResult<Vec<FileEntry>> {
        self.load_with(self.query.get_options().include_content).await
    }

    async fn load_with(&self, include_content: bool) -> LayerFsResult<Vec<FileEntry>> {
        let options = self.query.get_options();
        let mut walk = Traversal::new(&*self.backend, VirtualPath::root(), options.recursive, true);
        let mut entries = Vec::new();

        while let Some(entry) = walk.next().await {
            let (path, stat) = entry?;
            let Some(stat) = stat else { continue };
            if !self.query.matches(&path, &stat) {
                continue;
            }

            let content = if include_content {
                match read_opt(&*self.backend, &path).await? {
                    Some(content) => Some(content),
                    None => {
                        tracing::debug!("path disappeared before read: {}", path);
                        continue;
                    }
                }
            } else {
                None
            };

            let stats = options.include_stats.then_some(stat);
            entries.push(FileEntry::new(path, stats, content));
        }

        Ok(entries)
    }

    /// Counts the files matching the query without loading their content.
    pub async fn count(&self) -> LayerFsResult<usize> {
        Ok(self.load_with(false).await?.len())
    }

    /// Loads the matching files and keeps the ones accepted by `predicate`.
    pub async fn filter(
        &self,
        predicate: impl Fn(&FileEntry) -> bool,
    ) -> LayerFsResult<Vec<FileEntry>> {
        let entries = self.load().await?;
        Ok(entries.into_iter().filter(|e| predicate(e)).collect())
    }

    /// Searches the content of matching files line by line.
    ///
    /// Files that are not valid UTF-8 are treated as binary and skipped.
    ///
    /// ## Errors
    ///
    /// Returns [`LayerFsError::InvalidQuery`] if the query has neither a content pattern nor a
    /// content regex.
    pub async fn search_content(&self) -> LayerFsResult<Vec<SearchMatch>> {
        let matcher = self.query.get_content_matcher().ok_or_else(|| {
            LayerFsError::InvalidQuery(
                "either content_pattern or content_regex must be set".to_string(),
            )
        })?;
        let limit = self.query.get_options().max_matches_per_file.filter(|n| *n > 0);

        let mut matches = Vec::new();
        for entry in self.load_with(true).await? {
            let Some(content) = entry.content.as_ref() else {
                continue;
            };

            let Ok(text) = std::str::from_utf8(content) else {
                tracing::trace!("skipping binary file: {}", entry.path);
                continue;
            };

            let mut found = 0;
            'lines: for (index, line) in text.split('\n').enumerate() {
                for m in matcher.find_iter(line) {
                    matches.push(SearchMatch {
                        file: entry.path.clone(),
                        line: index + 1,
                        text: line.trim().to_string(),
                        column: m.start(),
                        match_start: m.start(),
                        match_end: m.end(),
                    });

                    found += 1;
                    if limit.is_some_and(|limit| found >= limit) {
                        break 'lines;
                    }
                }
            }
        }

        Ok(matches)
    }

    /// Returns the matching files whose content contains `pattern`.
    ///
    /// The pattern is literal text unless `regex` is `true`.
    pub async fn files_containing(
        &self,
        pattern: &str,
        regex: bool,
    ) -> LayerFsResult<Vec<FileEntry>> {
        let search = self.rewrite(|options| {
            if regex {
                options.content_regex = Some(pattern.to_string());
            } else {
                options.content_regex = None;
                options.content_pattern = Some(pattern.to_string());
            }
        })?;

        let files = search
            .search_content()
            .await?
            .into_iter()
            .map(|m| m.file)
            .collect::<BTreeSet<_>>();

        self.filter(|entry| files.contains(&entry.path)).await
    }

    /// Returns the matching files modified within `max_age` of now.
    pub async fn recent_files(&self, max_age: Duration) -> LayerFsResult<Vec<FileEntry>> {
        let cutoff = Utc::now() - max_age;
        self.filter(|entry| {
            entry
                .stats
                .as_ref()
                .is_some_and(|stats| *stats.get_modified_at() >= cutoff)
        })
        .await
    }

    /// Returns the `n` largest matching files, largest first.
    pub async fn largest_files(&self, n: usize) -> LayerFsResult<Vec<FileEntry>> {
        let mut files = self.filter(|entry| entry.stats.is_some()).await?;
        files.sort_by_key(|entry| std::cmp::Reverse(entry.size()));
        files.truncate(n);
        Ok(files)
    }

    /// Returns the total size in bytes of the matching files.
    pub async fn total_size(&self) -> LayerFsResult<u64> {
        let files = self.load().await?;
        Ok(files.iter().filter_map(FileEntry::size).sum())
    }

    /// Groups the matching files by extension, such as `.rs`.
    ///
    /// Files without an extension are grouped under `(no extension)`.
    pub async fn group_by_extension(&self) -> LayerFsResult<BTreeMap<String, Vec<FileEntry>>> {
        let mut groups: BTreeMap<String, Vec<FileEntry>> = BTreeMap::new();
        for file in self.load().await? {
            let key = file.path.extension().unwrap_or(NO_EXTENSION_GROUP).to_string();
            groups.entry(key).or_default().push(file);
        }

        Ok(groups)
    }

    /// Returns a view with a different path glob.
    pub fn with_pattern(&self, pattern: impl Into<String>) -> LayerFsResult<Self> {
        let pattern = pattern.into();
        self.rewrite(|options| options.path_pattern = pattern)
    }

    /// Returns a view that does or does not load file content.
    pub fn with_content(&self, include: bool) -> LayerFsResult<Self> {
        self.rewrite(|options| options.include_content = include)
    }

    /// Returns a view with different size bounds.
    pub fn with_size_range(
        &self,
        min_size: Option<u64>,
        max_size: Option<u64>,
    ) -> LayerFsResult<Self> {
        self.rewrite(|options| {
            options.min_size = min_size;
            options.max_size = max_size;
        })
    }

    /// Returns a view with a different path regex.
    pub fn with_regex(&self, pattern: impl Into<String>) -> LayerFsResult<Self> {
        let pattern = pattern.into();
        self.rewrite(|options| options.regex_pattern = Some(pattern))
    }

    fn rewrite(&self, update: impl FnOnce(&mut QueryOptions)) -> LayerFsResult<Self> {
        Ok(Self::new(self.backend.clone(), self.query.with_options(update)?))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
