//! Notebook registry persistence.
//!
//! # Responsibility
//! - Store and load the whole notebook registry snapshot.
//! - Map content records to and from `content_records` rows.
//!
//! # Invariants
//! - `save` replaces every row inside one transaction.
//! - A loaded snapshot equals the saved one field by field.
//! - Timestamps are stored as signed nanoseconds relative to the Unix epoch.

use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::content::{ContentKind, ContentRecord, MarkupKind};
use crate::settings::{RendererConfig, Settings};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

pub type RepoResult<T> = Result<T, RepoError>;

const META_NAME: &str = "name";
const META_LOCATION: &str = "location";
const META_SETTINGS_CACHE: &str = "settings_cache";
const META_RENDERER_CACHE: &str = "renderer_cache";

/// Registry storage failure.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
    Serialization(serde_json::Error),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid registry data: {message}"),
            Self::Serialization(err) => write!(f, "registry cache encoding failed: {err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
            Self::Serialization(err) => Some(err),
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Resolved settings with the config-file mtime they were read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSettings {
    pub settings: Arc<Settings>,
    pub modified: SystemTime,
}

/// Renderer configuration with the settings timestamp it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRendererConfig {
    pub config: Arc<RendererConfig>,
    pub settings_modified: SystemTime,
}

/// Everything persisted for one notebook.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookSnapshot {
    pub name: String,
    pub location: PathBuf,
    pub notes: BTreeMap<String, ContentRecord>,
    pub appendices: BTreeMap<String, ContentRecord>,
    pub settings_cache: Option<CachedSettings>,
    pub renderer_cache: Option<CachedRendererConfig>,
}

/// Whole-snapshot registry storage.
pub trait RegistryStore {
    /// Loads the stored snapshot, or `None` for an empty registry.
    fn load(&self) -> RepoResult<Option<NotebookSnapshot>>;
    /// Replaces the stored snapshot.
    fn save(&mut self, snapshot: &NotebookSnapshot) -> RepoResult<()>;
}

/// SQLite-backed registry store.
pub struct SqliteRegistryStore {
    conn: Connection,
}

impl SqliteRegistryStore {
    /// Opens (creating and migrating if needed) the registry at `path`.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self {
            conn: open_db(path)?,
        })
    }

    pub fn in_memory() -> RepoResult<Self> {
        Ok(Self {
            conn: open_db_in_memory()?,
        })
    }
}

impl RegistryStore for SqliteRegistryStore {
    fn load(&self) -> RepoResult<Option<NotebookSnapshot>> {
        let Some(name) = read_meta(&self.conn, META_NAME)? else {
            return Ok(None);
        };
        let location = read_meta(&self.conn, META_LOCATION)?
            .map(PathBuf::from)
            .ok_or_else(|| RepoError::InvalidData("missing notebook location".to_string()))?;
        let settings_cache = read_meta(&self.conn, META_SETTINGS_CACHE)?
            .map(|json| serde_json::from_str(&json))
            .transpose()?;
        let renderer_cache = read_meta(&self.conn, META_RENDERER_CACHE)?
            .map(|json| serde_json::from_str(&json))
            .transpose()?;

        let mut notes = BTreeMap::new();
        let mut appendices = BTreeMap::new();
        let mut stmt = self.conn.prepare(
            "SELECT kind, registry_key, name, date, src_path, markup, slug,
                    src_modified_ns, html_path, pdf_path, pdf_modified_ns
             FROM content_records
             ORDER BY kind, registry_key;",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let (key, record) = parse_record_row(row)?;
            match record.kind {
                ContentKind::Note => notes.insert(key, record),
                ContentKind::Appendix => appendices.insert(key, record),
            };
        }

        Ok(Some(NotebookSnapshot {
            name,
            location,
            notes,
            appendices,
            settings_cache,
            renderer_cache,
        }))
    }

    fn save(&mut self, snapshot: &NotebookSnapshot) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = save_snapshot(&mut self.conn, snapshot);
        match &result {
            Ok(()) => info!(
                "event=registry_save module=repo status=ok records={} duration_ms={}",
                snapshot.notes.len() + snapshot.appendices.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=registry_save module=repo status=error duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            ),
        }
        result
    }
}

fn save_snapshot(conn: &mut Connection, snapshot: &NotebookSnapshot) -> RepoResult<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM notebook_meta;", [])?;
    tx.execute("DELETE FROM content_records;", [])?;

    let mut meta = vec![
        (META_NAME, snapshot.name.clone()),
        (META_LOCATION, path_to_db(&snapshot.location)?.to_string()),
    ];
    if let Some(cache) = &snapshot.settings_cache {
        meta.push((META_SETTINGS_CACHE, serde_json::to_string(cache)?));
    }
    if let Some(cache) = &snapshot.renderer_cache {
        meta.push((META_RENDERER_CACHE, serde_json::to_string(cache)?));
    }
    for (key, value) in meta {
        tx.execute(
            "INSERT INTO notebook_meta (key, value) VALUES (?1, ?2);",
            params![key, value],
        )?;
    }

    for (key, record) in snapshot.notes.iter().chain(snapshot.appendices.iter()) {
        tx.execute(
            "INSERT INTO content_records (
                kind, registry_key, name, date, src_path, markup, slug,
                src_modified_ns, html_path, pdf_path, pdf_modified_ns
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                record.kind.as_str(),
                key,
                record.name,
                record.date,
                path_to_db(&record.src_path)?,
                record.markup.extension(),
                record.slug,
                time_to_db(record.src_modified)?,
                record.html_path.as_deref().map(path_to_db).transpose()?,
                record.pdf_path.as_deref().map(path_to_db).transpose()?,
                record.pdf_modified.map(time_to_db).transpose()?,
            ],
        )?;
    }

    tx.commit()?;
    Ok(())
}

fn read_meta(conn: &Connection, key: &str) -> RepoResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM notebook_meta WHERE key = ?1;",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<(String, ContentRecord)> {
    let kind_text: String = row.get("kind")?;
    let kind = parse_kind(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid kind `{kind_text}` in content_records.kind"))
    })?;
    let markup_text: String = row.get("markup")?;
    let markup = MarkupKind::from_extension(&markup_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid markup `{markup_text}` in content_records.markup"
        ))
    })?;

    let record = ContentRecord {
        name: row.get("name")?,
        date: row.get("date")?,
        src_path: PathBuf::from(row.get::<_, String>("src_path")?),
        markup,
        slug: row.get("slug")?,
        kind,
        src_modified: time_from_db(row.get("src_modified_ns")?),
        html_path: row.get::<_, Option<String>>("html_path")?.map(PathBuf::from),
        pdf_path: row.get::<_, Option<String>>("pdf_path")?.map(PathBuf::from),
        pdf_modified: row.get::<_, Option<i64>>("pdf_modified_ns")?.map(time_from_db),
    };
    Ok((row.get("registry_key")?, record))
}

fn parse_kind(value: &str) -> Option<ContentKind> {
    match value {
        "note" => Some(ContentKind::Note),
        "appendix" => Some(ContentKind::Appendix),
        _ => None,
    }
}

fn path_to_db(path: &Path) -> RepoResult<&str> {
    path.to_str()
        .ok_or_else(|| RepoError::InvalidData(format!("non UTF-8 path `{}`", path.display())))
}

fn time_to_db(time: SystemTime) -> RepoResult<i64> {
    let out_of_range = || RepoError::InvalidData(format!("timestamp {time:?} out of range"));
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).map_err(|_| out_of_range()),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|nanos| -nanos)
            .map_err(|_| out_of_range()),
    }
}

fn time_from_db(nanos: i64) -> SystemTime {
    let offset = Duration::from_nanos(nanos.unsigned_abs());
    if nanos >= 0 {
        SystemTime::UNIX_EPOCH + offset
    } else {
        SystemTime::UNIX_EPOCH - offset
    }
}
