use getset::Getters;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{FileStat, GlobPattern, LayerFsError, LayerFsResult, VirtualPath, DEFAULT_PATH_PATTERN};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The declarative form of a file query.
///
/// Options are plain data and can be deserialized from configuration. They are compiled and
/// validated by [`ViewQuery::new`] before any file is touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct QueryOptions {
    /// Glob pattern the file path must match.
    #[builder(default = DEFAULT_PATH_PATTERN.to_string(), setter(into))]
    pub path_pattern: String,

    /// Whether to descend into subdirectories.
    #[builder(default = true)]
    pub recursive: bool,

    /// Whether to load the content of matched files.
    #[builder(default)]
    pub include_content: bool,

    /// Whether to keep the stats of matched files in the results.
    #[builder(default = true)]
    pub include_stats: bool,

    /// Regex the file path must also contain a match for.
    #[builder(default, setter(strip_option, into))]
    pub regex_pattern: Option<String>,

    /// Files smaller than this many bytes are excluded.
    #[builder(default, setter(strip_option))]
    pub min_size: Option<u64>,

    /// Files larger than this many bytes are excluded.
    #[builder(default, setter(strip_option))]
    pub max_size: Option<u64>,

    /// Literal text to search for in file content.
    #[builder(default, setter(strip_option, into))]
    pub content_pattern: Option<String>,

    /// Regex to search for in file content. Takes precedence over `content_pattern`.
    #[builder(default, setter(strip_option, into))]
    pub content_regex: Option<String>,

    /// Whether content search is case sensitive.
    #[builder(default = true)]
    pub case_sensitive: bool,

    /// Whether a literal `content_pattern` only matches whole words.
    #[builder(default)]
    pub whole_word: bool,

    /// The most matches reported per file. `None` reports every match.
    #[builder(default, setter(strip_option))]
    pub max_matches_per_file: Option<usize>,
}

/// A validated, compiled query.
#[derive(Debug, Clone, Getters)]
pub struct ViewQuery {
    /// The options this query was compiled from.
    #[getset(get = "pub with_prefix")]
    options: QueryOptions,

    /// The compiled path glob.
    #[getset(get = "pub with_prefix")]
    glob: GlobPattern,

    path_regex: Option<Regex>,
    content_matcher: Option<Regex>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ViewQuery {
    /// Validates and compiles query options.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - `min_size` is greater than `max_size`
    /// - the path regex or content regex fails to compile
    pub fn new(options: QueryOptions) -> LayerFsResult<Self> {
        if let (Some(min), Some(max)) = (options.min_size, options.max_size) {
            if min > max {
                return Err(LayerFsError::InvalidQuery(format!(
                    "min_size ({min}) must be less than or equal to max_size ({max})"
                )));
            }
        }

        let glob = GlobPattern::new(&options.path_pattern)?;
        let path_regex = options
            .regex_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()?;
        let content_matcher = compile_content_matcher(&options)?;

        Ok(Self {
            options,
            glob,
            path_regex,
            content_matcher,
        })
    }

    /// Returns a query matching every file.
    pub fn all() -> LayerFsResult<Self> {
        Self::new(QueryOptions::default())
    }

    /// Returns `true` if the path matches the glob.
    pub fn matches_path(&self, path: &VirtualPath) -> bool {
        self.glob.matches(path)
    }

    /// Returns `true` if the path contains a match for the secondary regex, or no regex is set.
    pub fn matches_regex(&self, path: &VirtualPath) -> bool {
        self.path_regex
            .as_ref()
            .map_or(true, |regex| regex.is_match(path.as_str()))
    }

    /// Returns `true` if the size lies within the configured bounds.
    pub fn matches_size(&self, size: u64) -> bool {
        self.options.min_size.map_or(true, |min| size >= min)
            && self.options.max_size.map_or(true, |max| size <= max)
    }

    /// Returns `true` if a file passes every path and size filter of the query.
    pub fn matches(&self, path: &VirtualPath, stat: &FileStat) -> bool {
        self.matches_path(path) && self.matches_size(stat.get_size()) && self.matches_regex(path)
    }

    /// Returns the compiled content matcher, if the query searches content.
    pub fn get_content_matcher(&self) -> Option<&Regex> {
        self.content_matcher.as_ref()
    }

    /// Recompiles the query after changing its options.
    pub fn with_options(&self, update: impl FnOnce(&mut QueryOptions)) -> LayerFsResult<Self> {
        let mut options = self.options.clone();
        update(&mut options);
        Self::new(options)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn compile_content_matcher(options: &QueryOptions) -> LayerFsResult<Option<Regex>> {
    let source = match (&options.content_regex, &options.content_pattern) {
        (Some(regex), _) => regex.clone(),
        (None, Some(literal)) if options.whole_word => format!(r"\b{}\b", regex::escape(literal)),
        (None, Some(literal)) => regex::escape(literal),
        (None, None) => return Ok(None),
    };

    let regex = RegexBuilder::new(&source)
        .case_insensitive(!options.case_sensitive)
        .build()?;

    Ok(Some(regex))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for QueryOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
