//! Crate-level error taxonomy for notebook operations.
//!
//! # Responsibility
//! - Give every notebook use-case one structured failure type.
//! - Keep validation, not-found, conflict and external-process failures
//!   distinguishable so callers can decide how to react.
//!
//! # Invariants
//! - Errors are never silently corrected; callers receive them unchanged.

use crate::db::DbError;
use crate::external::ToolError;
use crate::pdf::PdfError;
use crate::repo::registry_repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub type NotebookResult<T> = Result<T, NotebookError>;

/// Failure raised by notebook, content and settings operations.
#[derive(Debug)]
pub enum NotebookError {
    /// Date string does not match the required pattern.
    InvalidDate(String),
    /// Title slugifies to an empty file stem.
    InvalidTitle(String),
    /// Source file extension is not one of the supported markup kinds.
    UnrecognizedFormat(String),
    /// A source file with the same stem already exists.
    SlugCollision(PathBuf),
    /// Registry key already exists and overwrite was not requested.
    AlreadyRegistered(String),
    /// A user setting has a different type than its default.
    SettingTypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    /// Settings file could not be read or parsed.
    Config { path: PathBuf, message: String },
    /// Source file of a tracked record does not exist.
    SourceMissing(PathBuf),
    /// No HTML artifact is known for a record that should be converted.
    HtmlMissing(String),
    /// Location holds no notebook registry.
    NoRegistry(PathBuf),
    /// Registry has no entry for the given key.
    NotRegistered(String),
    /// No file-store category matches the file type.
    NoDestination(String),
    /// Explicit placement location escapes the file store.
    InvalidLocation(PathBuf),
    /// Placement target already exists and overwrite was not requested.
    DestinationExists(PathBuf),
    /// Filesystem failure with the path it happened on.
    Io { path: PathBuf, source: io::Error },
    /// Registry persistence failure.
    Registry(RepoError),
    /// External renderer or converter failure.
    Tool(ToolError),
    /// PDF merge failure.
    Pdf(PdfError),
    /// Operation exists in the API but has no implementation yet.
    NotImplemented(&'static str),
}

impl NotebookError {
    /// Wraps an I/O error with the path that produced it.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl Display for NotebookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDate(value) => write!(f, "malformed date: `{value}`"),
            Self::InvalidTitle(title) => write!(f, "title `{title}` yields an empty slug"),
            Self::UnrecognizedFormat(name) => {
                write!(f, "unrecognized markup format for file `{name}`")
            }
            Self::SlugCollision(path) => {
                write!(f, "slug collision with existing file `{}`", path.display())
            }
            Self::AlreadyRegistered(key) => write!(f, "`{key}` is already registered"),
            Self::SettingTypeMismatch {
                key,
                expected,
                found,
            } => write!(
                f,
                "setting `{key}` has type {found}, expected {expected}"
            ),
            Self::Config { path, message } => {
                write!(f, "cannot load settings `{}`: {message}", path.display())
            }
            Self::SourceMissing(path) => {
                write!(f, "source file `{}` does not exist", path.display())
            }
            Self::HtmlMissing(slug) => write!(f, "no rendered HTML for `{slug}`"),
            Self::NoRegistry(path) => write!(f, "no notebook registry at `{}`", path.display()),
            Self::NotRegistered(key) => write!(f, "`{key}` is not registered"),
            Self::NoDestination(name) => write!(f, "no destination for file type of `{name}`"),
            Self::InvalidLocation(path) => write!(
                f,
                "location `{}` must be relative to the file store",
                path.display()
            ),
            Self::DestinationExists(path) => {
                write!(f, "destination `{}` already exists", path.display())
            }
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Tool(err) => write!(f, "{err}"),
            Self::Pdf(err) => write!(f, "{err}"),
            Self::NotImplemented(what) => write!(f, "{what} is not implemented"),
        }
    }
}

impl Error for NotebookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Registry(err) => Some(err),
            Self::Tool(err) => Some(err),
            Self::Pdf(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for NotebookError {
    fn from(value: RepoError) -> Self {
        Self::Registry(value)
    }
}

impl From<DbError> for NotebookError {
    fn from(value: DbError) -> Self {
        Self::Registry(RepoError::Db(value))
    }
}

impl From<ToolError> for NotebookError {
    fn from(value: ToolError) -> Self {
        Self::Tool(value)
    }
}

impl From<PdfError> for NotebookError {
    fn from(value: PdfError) -> Self {
        Self::Pdf(value)
    }
}
