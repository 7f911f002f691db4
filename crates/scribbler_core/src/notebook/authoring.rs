//! Creating and registering notes and appendices.
//!
//! # Invariants
//! - A new source never overwrites an existing file.
//! - No two sources in one directory share a stem across markup kinds.

use super::templates::front_matter;
use super::Notebook;
use crate::error::{NotebookError, NotebookResult};
use crate::model::content::{ContentKind, ContentRecord, MarkupKind, UNKNOWN_DATE};
use chrono::{NaiveDate, NaiveDateTime};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

static NOTE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}$").expect("valid note date regex"));
static REGISTER_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}( \d{2}:\d{2})?$").expect("valid register date regex")
});

/// Accepts exactly `YYYY-MM-DD HH:MM` naming a real calendar minute.
fn validate_note_date(date: &str) -> NotebookResult<()> {
    if NOTE_DATE.is_match(date) && NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M").is_ok() {
        Ok(())
    } else {
        Err(NotebookError::InvalidDate(date.to_string()))
    }
}

/// Accepts `YYYY-MM-DD` with an optional ` HH:MM`.
fn validate_register_date(date: &str) -> NotebookResult<()> {
    if !REGISTER_DATE.is_match(date) {
        return Err(NotebookError::InvalidDate(date.to_string()));
    }
    let valid = if date.len() == 10 {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
    } else {
        NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M").is_ok()
    };
    if valid {
        Ok(())
    } else {
        Err(NotebookError::InvalidDate(date.to_string()))
    }
}

fn title_slug(title: &str) -> NotebookResult<String> {
    let slug = slug::slugify(title);
    if slug.is_empty() {
        return Err(NotebookError::InvalidTitle(title.to_string()));
    }
    Ok(slug)
}

/// Fails when `dir` holds a source named `stem` with any supported extension,
/// other than `allowed`.
fn check_slug_collision(dir: &Path, stem: &str, allowed: Option<&Path>) -> NotebookResult<()> {
    for markup in MarkupKind::ALL {
        let candidate = dir.join(format!("{stem}.{}", markup.extension()));
        if candidate.exists() && Some(candidate.as_path()) != allowed {
            return Err(NotebookError::SlugCollision(candidate));
        }
    }
    Ok(())
}

fn basename_key(path: &Path) -> NotebookResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| NotebookError::UnrecognizedFormat(path.display().to_string()))
}

impl Notebook {
    /// Creates `notes/<date>-<slug>.<ext>` from a template and registers it.
    ///
    /// # Errors
    /// - `InvalidDate` unless `date` is `YYYY-MM-DD HH:MM`.
    /// - `SlugCollision` when the stem exists with any markup extension.
    pub fn create_note(&mut self, date: &str, title: &str, markup: MarkupKind) -> NotebookResult<PathBuf> {
        validate_note_date(date)?;
        let stem = format!("{}-{}", &date[..10], title_slug(title)?);
        self.create_source(ContentKind::Note, &stem, title, Some(date), markup)
    }

    /// Creates `appendices/<slug>.<ext>` from a template and registers it.
    pub fn create_appendix(&mut self, title: &str, markup: MarkupKind) -> NotebookResult<PathBuf> {
        let stem = title_slug(title)?;
        self.create_source(ContentKind::Appendix, &stem, title, None, markup)
    }

    /// Registers an existing file as a note, copying it under `notes/` if needed.
    pub fn register_existing_note(
        &mut self,
        date: &str,
        title: &str,
        path: &Path,
        overwrite: bool,
    ) -> NotebookResult<PathBuf> {
        validate_register_date(date)?;
        self.register_existing(ContentKind::Note, date, title, path, overwrite)
    }

    /// Registers an existing file as an appendix, copying it under `appendices/` if needed.
    pub fn register_existing_appendix(
        &mut self,
        title: &str,
        path: &Path,
        overwrite: bool,
    ) -> NotebookResult<PathBuf> {
        self.register_existing(ContentKind::Appendix, UNKNOWN_DATE, title, path, overwrite)
    }

    fn create_source(
        &mut self,
        kind: ContentKind,
        stem: &str,
        title: &str,
        date: Option<&str>,
        markup: MarkupKind,
    ) -> NotebookResult<PathBuf> {
        let dir = self.paths.resolve(kind.source_dir());
        std::fs::create_dir_all(&dir).map_err(|err| NotebookError::io(&dir, err))?;
        check_slug_collision(&dir, stem, None)?;

        let file_name = format!("{stem}.{}", markup.extension());
        let path = dir.join(&file_name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::AlreadyExists => NotebookError::SlugCollision(path.clone()),
                _ => NotebookError::io(&path, err),
            })?;
        file.write_all(front_matter(markup, title, date).as_bytes())
            .map_err(|err| NotebookError::io(&path, err))?;

        let relative = Path::new(kind.source_dir()).join(&file_name);
        let record = ContentRecord::new(title, date.unwrap_or(UNKNOWN_DATE), relative, &self.paths)?;
        self.registry_mut(kind).insert(file_name, record);
        self.persist()?;
        info!(
            "event=content_create module=notebook status=ok kind={} markup={markup}",
            kind.as_str()
        );
        Ok(path)
    }

    fn register_existing(
        &mut self,
        kind: ContentKind,
        date: &str,
        title: &str,
        path: &Path,
        overwrite: bool,
    ) -> NotebookResult<PathBuf> {
        MarkupKind::from_path(path)?;
        if !path.is_file() {
            return Err(NotebookError::SourceMissing(path.to_path_buf()));
        }
        let key = basename_key(path)?;
        if self.registry(kind).contains_key(&key) && !overwrite {
            return Err(NotebookError::AlreadyRegistered(key));
        }

        let tree = self.paths.resolve(kind.source_dir());
        std::fs::create_dir_all(&tree).map_err(|err| NotebookError::io(&tree, err))?;
        let tree = std::fs::canonicalize(&tree).map_err(|err| NotebookError::io(&tree, err))?;
        let source = std::fs::canonicalize(path).map_err(|err| NotebookError::io(path, err))?;
        let stem = Path::new(&key)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();

        let placed = if source.starts_with(&tree) {
            let parent = source.parent().unwrap_or(tree.as_path());
            check_slug_collision(parent, &stem, Some(source.as_path()))?;
            source
        } else {
            let target = tree.join(&key);
            let allowed = overwrite.then_some(target.as_path());
            check_slug_collision(&tree, &stem, allowed)?;
            std::fs::copy(&source, &target).map_err(|err| NotebookError::io(&target, err))?;
            target
        };

        let location = std::fs::canonicalize(self.paths.location())
            .map_err(|err| NotebookError::io(self.paths.location(), err))?;
        let relative = placed
            .strip_prefix(&location)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| Path::new(kind.source_dir()).join(&key));

        let absolute = self.paths.resolve(&relative);
        let record = ContentRecord::new(title, date, relative, &self.paths)?;
        self.registry_mut(kind).insert(key, record);
        self.persist()?;
        info!(
            "event=content_register module=notebook status=ok kind={} overwrite={overwrite}",
            kind.as_str()
        );
        Ok(absolute)
    }

    /// Looks up one tracked record by its source basename.
    ///
    /// # Errors
    /// - `NotRegistered` when `key` is not tracked under `kind`.
    pub fn record(&self, kind: ContentKind, key: &str) -> NotebookResult<&ContentRecord> {
        self.registry(kind)
            .get(key)
            .ok_or_else(|| NotebookError::NotRegistered(key.to_string()))
    }

    pub(crate) fn registry(&self, kind: ContentKind) -> &BTreeMap<String, ContentRecord> {
        match kind {
            ContentKind::Note => &self.notes,
            ContentKind::Appendix => &self.appendices,
        }
    }

    pub(crate) fn registry_mut(&mut self, kind: ContentKind) -> &mut BTreeMap<String, ContentRecord> {
        match kind {
            ContentKind::Note => &mut self.notes,
            ContentKind::Appendix => &mut self.appendices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_note_date, validate_register_date};

    #[test]
    fn note_dates_need_time_and_calendar_validity() {
        assert!(validate_note_date("2015-10-19 20:17").is_ok());
        assert!(validate_note_date("2015-10-19").is_err());
        assert!(validate_note_date("2015-02-30 10:00").is_err());
        assert!(validate_note_date("2015-10-19 25:00").is_err());
        assert!(validate_note_date("15-10-19 20:17").is_err());
    }

    #[test]
    fn registered_dates_allow_missing_time() {
        assert!(validate_register_date("2015-10-19").is_ok());
        assert!(validate_register_date("2015-10-19 08:05").is_ok());
        assert!(validate_register_date("2015-13-01").is_err());
        assert!(validate_register_date("2015-10-19T08:05").is_err());
    }
}
