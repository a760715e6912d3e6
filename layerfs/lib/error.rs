use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use thiserror::Error;

use crate::VirtualPath;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a layerfs operation.
pub type LayerFsResult<T> = Result<T, LayerFsError>;

/// An error that occurred during a layerfs operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum LayerFsError {
    /// The path does not exist
    #[error("path does not exist: {0}")]
    NotFound(VirtualPath),

    /// The path already exists
    #[error("path already exists: {0}")]
    AlreadyExists(VirtualPath),

    /// The path is not a directory
    #[error("path is not a directory: {0}")]
    NotADirectory(VirtualPath),

    /// The path is a directory
    #[error("path is a directory: {0}")]
    IsADirectory(VirtualPath),

    /// The directory is not empty
    #[error("directory is not empty: {0}")]
    DirectoryNotEmpty(VirtualPath),

    /// Insufficient permissions to perform the operation
    #[error("insufficient permissions for operation on: {0}")]
    PermissionDenied(VirtualPath),

    /// The path is not valid for the operation
    #[error("invalid path: {0}")]
    InvalidPath(VirtualPath),

    /// A backend failure that does not map onto any other kind
    #[error("backend error ({code}) on {path}: {message}")]
    Backend {
        /// The path the backend was operating on
        path: VirtualPath,

        /// The raw code reported by the backend
        code: ErrorCode,

        /// The backend's message
        message: String,
    },

    /// A query was configured with contradictory or missing options
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A path or content regex failed to compile
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration could not be parsed
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// IO error against the physical disk
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// One or more paths could not be removed while resetting an overlay
    #[error("failed to reset {} path(s): {}", .failures.len(), format_failures(.failures))]
    ResetFailed {
        /// The paths that failed along with the reason
        failures: Vec<(VirtualPath, String)>,
    },

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// The closed set of codes a storage backend can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// `ENOENT`
    NotFound,

    /// `EEXIST`
    AlreadyExists,

    /// `ENOTDIR`
    NotADirectory,

    /// `EISDIR`
    IsADirectory,

    /// `ENOTEMPTY`
    DirectoryNotEmpty,

    /// `EPERM`
    PermissionDenied,

    /// `EINVAL`
    InvalidArgument,

    /// Anything else
    Other,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerFsError {
    /// Wraps any error as a custom layerfs error.
    pub fn custom(error: impl Into<anyhow::Error>) -> LayerFsError {
        LayerFsError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Translates a raw backend code into the matching error kind.
    ///
    /// Codes outside the known set become [`LayerFsError::Backend`] so the message is kept.
    pub fn from_code(code: ErrorCode, path: VirtualPath, message: impl Into<String>) -> Self {
        match code {
            ErrorCode::NotFound => LayerFsError::NotFound(path),
            ErrorCode::AlreadyExists => LayerFsError::AlreadyExists(path),
            ErrorCode::NotADirectory => LayerFsError::NotADirectory(path),
            ErrorCode::IsADirectory => LayerFsError::IsADirectory(path),
            ErrorCode::DirectoryNotEmpty => LayerFsError::DirectoryNotEmpty(path),
            ErrorCode::PermissionDenied => LayerFsError::PermissionDenied(path),
            ErrorCode::InvalidArgument => LayerFsError::InvalidPath(path),
            ErrorCode::Other => LayerFsError::Backend {
                path,
                code,
                message: message.into(),
            },
        }
    }

    /// Returns the backend code this error corresponds to.
    pub fn code(&self) -> ErrorCode {
        match self {
            LayerFsError::NotFound(_) => ErrorCode::NotFound,
            LayerFsError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            LayerFsError::NotADirectory(_) => ErrorCode::NotADirectory,
            LayerFsError::IsADirectory(_) => ErrorCode::IsADirectory,
            LayerFsError::DirectoryNotEmpty(_) => ErrorCode::DirectoryNotEmpty,
            LayerFsError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            LayerFsError::InvalidPath(_) | LayerFsError::InvalidQuery(_) => {
                ErrorCode::InvalidArgument
            }
            LayerFsError::Backend { code, .. } => *code,
            LayerFsError::Io(e) => ErrorCode::from(e.kind()),
            _ => ErrorCode::Other,
        }
    }

    /// Returns `true` if this error means the path is absent.
    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    /// Returns the path this error is about, if it has one.
    pub fn path(&self) -> Option<&VirtualPath> {
        match self {
            LayerFsError::NotFound(p)
            | LayerFsError::AlreadyExists(p)
            | LayerFsError::NotADirectory(p)
            | LayerFsError::IsADirectory(p)
            | LayerFsError::DirectoryNotEmpty(p)
            | LayerFsError::PermissionDenied(p)
            | LayerFsError::InvalidPath(p) => Some(p),
            LayerFsError::Backend { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl ErrorCode {
    /// Returns the POSIX name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "ENOENT",
            ErrorCode::AlreadyExists => "EEXIST",
            ErrorCode::NotADirectory => "ENOTDIR",
            ErrorCode::IsADirectory => "EISDIR",
            ErrorCode::DirectoryNotEmpty => "ENOTEMPTY",
            ErrorCode::PermissionDenied => "EPERM",
            ErrorCode::InvalidArgument => "EINVAL",
            ErrorCode::Other => "EOTHER",
        }
    }

    /// Parses a POSIX code name. Unknown names map to [`ErrorCode::Other`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "ENOENT" => ErrorCode::NotFound,
            "EEXIST" => ErrorCode::AlreadyExists,
            "ENOTDIR" => ErrorCode::NotADirectory,
            "EISDIR" => ErrorCode::IsADirectory,
            "ENOTEMPTY" => ErrorCode::DirectoryNotEmpty,
            "EPERM" | "EACCES" => ErrorCode::PermissionDenied,
            "EINVAL" => ErrorCode::InvalidArgument,
            _ => ErrorCode::Other,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn format_failures(failures: &[(VirtualPath, String)]) -> String {
    failures
        .iter()
        .map(|(path, reason)| format!("{path} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<io::ErrorKind> for ErrorCode {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => ErrorCode::NotFound,
            io::ErrorKind::AlreadyExists => ErrorCode::AlreadyExists,
            io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            io::ErrorKind::InvalidInput => ErrorCode::InvalidArgument,
            io::ErrorKind::NotADirectory => ErrorCode::NotADirectory,
            io::ErrorKind::IsADirectory => ErrorCode::IsADirectory,
            io::ErrorKind::DirectoryNotEmpty => ErrorCode::DirectoryNotEmpty,
            _ => ErrorCode::Other,
        }
    }
}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_code_maps_every_known_code() {
        let path = VirtualPath::root().join("f");
        let cases = [
            (ErrorCode::NotFound, "ENOENT"),
            (ErrorCode::AlreadyExists, "EEXIST"),
            (ErrorCode::NotADirectory, "ENOTDIR"),
            (ErrorCode::IsADirectory, "EISDIR"),
            (ErrorCode::DirectoryNotEmpty, "ENOTEMPTY"),
            (ErrorCode::PermissionDenied, "EPERM"),
            (ErrorCode::InvalidArgument, "EINVAL"),
        ];

        for (code, name) in cases {
            let error = LayerFsError::from_code(code, path.clone(), "boom");
            assert_eq!(error.code(), code);
            assert_eq!(error.code().as_str(), name);
            assert_eq!(ErrorCode::from_name(name), code);
            assert_eq!(error.path(), Some(&path));
        }
    }

    #[test]
    fn test_error_unknown_code_keeps_message() {
        let error = LayerFsError::from_code(
            ErrorCode::from_name("EIO"),
            VirtualPath::root().join("disk"),
            "device went away",
        );

        assert_eq!(error.code(), ErrorCode::Other);
        assert!(error.to_string().contains("device went away"));
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_error_io_not_found_counts_as_not_found() {
        let error = LayerFsError::from(io::Error::from(io::ErrorKind::NotFound));
        assert!(error.is_not_found());
    }

    #[test]
    fn test_error_reset_failed_lists_paths() {
        let error = LayerFsError::ResetFailed {
            failures: vec![(VirtualPath::root(), "invalid path: /".to_string())],
        };

        assert_eq!(
            error.to_string(),
            "failed to reset 1 path(s): / (invalid path: /)"
        );
    }
}
