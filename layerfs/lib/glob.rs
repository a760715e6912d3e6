use std::fmt::{self, Display};

use regex::Regex;

use crate::{normalize_glob_pattern, LayerFsResult, VirtualPath, SEPARATOR};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A glob pattern compiled into an anchored regular expression.
///
/// The supported tokens are:
/// - `**/` matches zero or more whole path segments
/// - `**` matches anything, including separators
/// - `*` matches anything within one segment
/// - `?` matches exactly one character other than `/`
///
/// Every other character is literal. A pattern without a `/` matches against the file name
/// anywhere in the tree, as if it were prefixed with `**/`. A pattern starting with `/` is matched
/// against the absolute path; any other pattern is matched relative to the root.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    /// The pattern as written, after normalization.
    pattern: String,

    /// The compiled matcher.
    matcher: Regex,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GlobPattern {
    /// Compiles a glob pattern.
    ///
    /// ## Errors
    ///
    /// Returns an error if the translated expression fails to compile, which only happens for
    /// patterns that exceed the regex engine's size limits.
    pub fn new(pattern: &str) -> LayerFsResult<Self> {
        let mut pattern = normalize_glob_pattern(pattern);
        if pattern.is_empty() {
            pattern.push_str("**");
        }

        let absolute = pattern.starts_with(SEPARATOR);
        let expanded = if pattern.contains(SEPARATOR) {
            pattern.clone()
        } else {
            format!("**/{pattern}")
        };

        // Paths are matched without their leading `/`
        let body = if absolute { &expanded[1..] } else { &expanded[..] };
        let matcher = Regex::new(&translate(body))?;

        Ok(Self { pattern, matcher })
    }

    /// Returns the normalized pattern.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Returns `true` if `path` matches the pattern.
    pub fn matches(&self, path: &VirtualPath) -> bool {
        self.matcher.is_match(path.relative())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Translates glob syntax into an anchored regex source.
fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut rest = pattern;
    while let Some(c) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix("**/") {
            out.push_str("(?:.*/)?");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("**") {
            out.push_str(".*");
            rest = tail;
        } else {
            match c {
                '*' => out.push_str("[^/]*"),
                '?' => out.push_str("[^/]"),
                _ => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
            rest = &rest[c.len_utf8()..];
        }
    }

    out.push('$');
    out
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        GlobPattern::new(pattern)
            .unwrap()
            .matches(&VirtualPath::from(path))
    }

    #[test]
    fn test_glob_basename_matches_anywhere() {
        assert!(matches("*.py", "/main.py"));
        assert!(matches("*.py", "/src/pkg/mod.py"));
        assert!(!matches("*.py", "/src/main.pyc"));
        assert!(matches("README", "/docs/README"));
    }

    #[test]
    fn test_glob_single_star_stays_in_segment() {
        assert!(matches("src/*.rs", "/src/lib.rs"));
        assert!(!matches("src/*.rs", "/src/nested/lib.rs"));
        assert!(!matches("src/*.rs", "/other/src/lib.rs"));
    }

    #[test]
    fn test_glob_double_star_spans_segments() {
        assert!(matches("src/**/*.rs", "/src/lib.rs"));
        assert!(matches("src/**/*.rs", "/src/a/b/c.rs"));
        assert!(matches("src/**", "/src/a/b/c.rs"));
        assert!(matches("**", "/anything/at/all"));
        assert!(matches("alpha//**/*.txt", "/alpha/beta/file.txt"));
    }

    #[test]
    fn test_glob_question_mark_is_one_char() {
        assert!(matches("file?.txt", "/file1.txt"));
        assert!(!matches("file?.txt", "/file10.txt"));
        assert!(!matches("a?b", "/a/b"));
    }

    #[test]
    fn test_glob_absolute_and_literals() {
        assert!(matches("/data/*.json", "/data/x.json"));
        assert!(!matches("/data/*.json", "/nested/data/x.json"));
        assert!(matches("(weird)[name].txt", "/(weird)[name].txt"));
        assert!(!matches("a.c", "/abc"));
    }

    #[test]
    fn test_glob_empty_matches_everything() {
        assert!(matches("", "/a/b"));
        assert_eq!(GlobPattern::new("./src//*.py").unwrap().as_str(), "src/*.py");
    }
}
