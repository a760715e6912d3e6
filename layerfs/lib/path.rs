//! Canonical virtual paths.

use std::{
    borrow::Borrow,
    convert::Infallible,
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The separator used by every virtual path.
pub const SEPARATOR: char = '/';

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An absolute, forward-slash delimited path inside a storage backend.
///
/// A `VirtualPath` is always in canonical form:
/// - it starts with `/`
/// - it never ends with `/` unless it is the root itself
/// - it contains no `.` or `..` segments and no empty segments
///
/// The only way to build one is through [`normalize_path`] (directly or via the `From`/`FromStr`
/// implementations), so every value upholds these rules.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(String);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VirtualPath {
    /// Returns the root path `/`.
    pub fn root() -> Self {
        VirtualPath(SEPARATOR.to_string())
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Joins a child path onto this path and normalizes the result.
    ///
    /// The child is always treated as relative, so `"/a".join("/b")` is `/a/b`.
    pub fn join(&self, child: impl AsRef<str>) -> Self {
        normalize_path(&format!("{}/{}", self.0, child.as_ref()))
    }

    /// Returns the parent of this path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        match self.0.rfind(SEPARATOR) {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(VirtualPath(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Returns the last segment of this path, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }

        self.0.rsplit(SEPARATOR).next()
    }

    /// Returns the extension of the last segment including the leading dot, if any.
    ///
    /// Dot-files such as `.bashrc` have no extension.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx..]),
        }
    }

    /// Iterates over the segments of this path. The root has no segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Returns the path without its leading `/`.
    pub fn relative(&self) -> &str {
        &self.0[1..]
    }

    /// Maps this path under a native directory.
    pub fn to_native(&self, root: impl Into<PathBuf>) -> PathBuf {
        let mut native = root.into();
        native.extend(self.segments());
        native
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Converts an arbitrary path string into its canonical [`VirtualPath`].
///
/// Backslashes become forward slashes, repeated separators collapse, `.` segments are dropped and
/// `..` segments pop the previous segment. Popping past the root is a no-op. The result is always
/// absolute and the function never fails; the empty string maps to `/`.
///
/// ## Examples
///
/// ```
/// use layerfs::normalize_path;
///
/// assert_eq!(normalize_path("a/b").as_str(), "/a/b");
/// assert_eq!(normalize_path("/a/./b/../c").as_str(), "/a/c");
/// assert_eq!(normalize_path(r"\a\b\").as_str(), "/a/b");
/// assert_eq!(normalize_path("").as_str(), "/");
/// ```
pub fn normalize_path(input: &str) -> VirtualPath {
    let segments = resolve_segments(input);
    let mut path = String::with_capacity(input.len() + 1);
    for segment in &segments {
        path.push(SEPARATOR);
        path.push_str(segment);
    }

    if path.is_empty() {
        path.push(SEPARATOR);
    }

    VirtualPath(path)
}

/// Cleans up a glob pattern the same way [`normalize_path`] cleans up paths.
///
/// Separators, `.` and `..` are handled identically, but the pattern is not made absolute: a
/// leading `/` is kept only if the input had one. Wildcard tokens (`*`, `**`, `?`) are kept
/// verbatim in their positions.
///
/// ## Examples
///
/// ```
/// use layerfs::normalize_glob_pattern;
///
/// assert_eq!(normalize_glob_pattern(r"src\**\*.py"), "src/**/*.py");
/// assert_eq!(normalize_glob_pattern("./src//*.py"), "src/*.py");
/// assert_eq!(normalize_glob_pattern("/data/**/*.json"), "/data/**/*.json");
/// ```
pub fn normalize_glob_pattern(pattern: &str) -> String {
    let absolute = pattern.starts_with(['/', '\\']);
    let joined = resolve_segments(pattern).join("/");

    if absolute {
        format!("{SEPARATOR}{joined}")
    } else {
        joined
    }
}

fn resolve_segments(input: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in input.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    segments
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for VirtualPath {
    fn default() -> Self {
        Self::root()
    }
}

impl Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VirtualPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(normalize_path(s))
    }
}

impl From<&str> for VirtualPath {
    fn from(value: &str) -> Self {
        normalize_path(value)
    }
}

impl From<String> for VirtualPath {
    fn from(value: String) -> Self {
        normalize_path(&value)
    }
}

impl From<&String> for VirtualPath {
    fn from(value: &String) -> Self {
        normalize_path(value)
    }
}

impl From<&VirtualPath> for VirtualPath {
    fn from(value: &VirtualPath) -> Self {
        value.clone()
    }
}

impl From<VirtualPath> for String {
    fn from(value: VirtualPath) -> Self {
        value.0
    }
}

impl AsRef<str> for VirtualPath {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for VirtualPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for VirtualPath {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for VirtualPath {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
