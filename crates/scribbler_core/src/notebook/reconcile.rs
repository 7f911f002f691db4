//! Bringing the registry in line with the source trees.
//!
//! # Invariants
//! - Running `reconcile` twice without filesystem changes is a no-op.
//! - Backup and hidden names (`*~`, `.*`, `#*`) are never registered.
//! - A source that disappears while walking is dropped, not reported.
//! - Unsupported extensions are skipped with a warning, never registered.

use super::Notebook;
use crate::error::{NotebookError, NotebookResult};
use crate::layout::{NotebookPaths, APPENDIX_DIR, NOTE_DIR};
use crate::model::content::{ContentRecord, MarkupKind, UNKNOWN_DATE};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::time::Instant;
use walkdir::{DirEntry, WalkDir};

/// Counts reported by one subtree walk.
#[derive(Debug, Default)]
struct WalkStats {
    added: usize,
    dropped: usize,
}

impl Notebook {
    /// Updates known records, adds new sources and forgets vanished ones.
    pub fn reconcile(&mut self) -> NotebookResult<()> {
        let started_at = Instant::now();
        info!("event=reconcile module=notebook status=start");

        let (notes, note_stats) =
            reconcile_tree(&self.paths, NOTE_DIR, std::mem::take(&mut self.notes))?;
        self.notes = notes;
        let (appendices, appendix_stats) =
            reconcile_tree(&self.paths, APPENDIX_DIR, std::mem::take(&mut self.appendices))?;
        self.appendices = appendices;

        self.persist()?;
        info!(
            "event=reconcile module=notebook status=ok added={} dropped={} duration_ms={}",
            note_stats.added + appendix_stats.added,
            note_stats.dropped + appendix_stats.dropped,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

pub(crate) fn is_ignored_name(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.ends_with('~') || name.starts_with('.') || name.starts_with('#')
}

fn reconcile_tree(
    paths: &NotebookPaths,
    subtree: &str,
    mut known: BTreeMap<String, ContentRecord>,
) -> NotebookResult<(BTreeMap<String, ContentRecord>, WalkStats)> {
    let root = paths.resolve(subtree);
    let mut observed = BTreeMap::new();
    let mut stats = WalkStats::default();

    if root.is_dir() {
        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_ignored_name(entry.file_name()));

        for entry in walker {
            let Some(entry) = walk_entry(entry)? else {
                continue;
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = entry.file_name().to_str().map(str::to_string) else {
                warn!("event=reconcile module=notebook status=warn reason=non_utf8_name");
                continue;
            };
            if observed.contains_key(&key) {
                warn!("event=reconcile module=notebook status=warn reason=duplicate_name key={key:?}");
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(paths.location())
                .map(Path::to_path_buf)
                .map_err(|err| NotebookError::io(entry.path(), io::Error::other(err)))?;

            let refreshed = match known.remove(&key) {
                Some(mut record) if record.src_path == relative => {
                    record.update(paths).map(|()| record)
                }
                Some(record) => ContentRecord::new(record.name, record.date, relative, paths),
                None => {
                    if MarkupKind::from_path(&relative).is_err() {
                        warn!(
                            "event=reconcile module=notebook status=warn reason=unsupported_markup key={key:?}"
                        );
                        continue;
                    }
                    stats.added += 1;
                    let placeholder = Path::new(&key)
                        .file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    ContentRecord::new(placeholder, UNKNOWN_DATE, relative, paths)
                }
            };

            match refreshed {
                Ok(record) => {
                    observed.insert(key, record);
                }
                Err(NotebookError::SourceMissing(_)) => {
                    debug!("event=reconcile module=notebook status=skip reason=vanished");
                }
                Err(err) => return Err(err),
            }
        }
    }

    stats.dropped = known.len();
    Ok((observed, stats))
}

/// Unwraps a walk entry; entries that vanished mid-walk become `None`.
fn walk_entry(entry: Result<DirEntry, walkdir::Error>) -> NotebookResult<Option<DirEntry>> {
    match entry {
        Ok(entry) => Ok(Some(entry)),
        Err(err) if err.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => Ok(None),
        Err(err) => {
            let path = err.path().map(Path::to_path_buf).unwrap_or_default();
            Err(NotebookError::io(path, io::Error::other(err)))
        }
    }
}
