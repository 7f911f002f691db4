//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure the notebook registry database.
//! - Apply schema migrations in deterministic order.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Registry data is never read or written before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Registry database failure.
#[derive(Debug)]
pub enum DbError {
    /// The registry file could not be opened, or is not a SQLite database.
    Registry { path: PathBuf, source: rusqlite::Error },
    /// A schema migration script failed and was rolled back.
    Migration { version: u32, source: rusqlite::Error },
    /// The registry was written by a newer scribbler.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Query failure on an already opened registry.
    Sqlite(rusqlite::Error),
}

impl DbError {
    /// Attaches the registry path to bare SQLite failures.
    pub(crate) fn at_registry(self, path: &Path) -> Self {
        match self {
            Self::Sqlite(source) => Self::Registry {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry { path, source } => {
                write!(f, "cannot open registry `{}`: {source}", path.display())
            }
            Self::Migration { version, source } => {
                write!(f, "registry migration {version} failed: {source}")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "registry schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Sqlite(err) => write!(f, "registry query failed: {err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry { source, .. } | Self::Migration { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
