//! File-store placement for arbitrary files.
//!
//! # Responsibility
//! - Compute where an external file belongs inside the notebook file store.
//! - Detect create-vs-overwrite conflicts before placing anything.
//! - Copy, hard-link or symlink files and directories into place.
//!
//! # Invariants
//! - Resolved destinations are always under the file-store directory;
//!   absolute or `..` locations are rejected.
//! - A destination for a directory source always ends with a separator.
//! - Symlink targets are relative to the link's parent directory.

use crate::error::{NotebookError, NotebookResult};
use log::info;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Category used when no specific extension matches.
pub const WILDCARD_FILETYPE: &str = "*";

/// How a file is brought into the file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementMode {
    Copy,
    HardLink,
    Symlink,
}

impl PlacementMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::HardLink => "hard_link",
            Self::Symlink => "symlink",
        }
    }
}

/// Computes the absolute destination of `path` inside `store_dir`.
///
/// With `explicit_location`, the location is taken relative to the store; an
/// existing directory (or a location ending in a separator) receives the
/// source basename. Without it, the longest configured extension matching
/// the file name selects the category, falling back to `*`.
pub fn resolve_destination(
    store_dir: &Path,
    filetypes: &BTreeMap<String, String>,
    path: &Path,
    explicit_location: Option<&Path>,
) -> NotebookResult<PathBuf> {
    let basename = path
        .file_name()
        .ok_or_else(|| NotebookError::NoDestination(path.display().to_string()))?;

    let dest = match explicit_location {
        Some(location) => {
            check_store_relative(location)?;
            let dest = store_dir.join(location);
            if dest.is_dir() || ends_with_separator(location) {
                dest.join(basename)
            } else {
                dest
            }
        }
        None => {
            let category = category_for(filetypes, basename)
                .ok_or_else(|| NotebookError::NoDestination(path.display().to_string()))?;
            store_dir.join(category).join(basename)
        }
    };

    if path.is_dir() {
        Ok(dest.join(""))
    } else {
        Ok(dest)
    }
}

/// Rejects locations that are absolute or climb above the store.
fn check_store_relative(location: &Path) -> NotebookResult<()> {
    let escapes = location.components().any(|component| {
        matches!(
            component,
            Component::Prefix(_) | Component::RootDir | Component::ParentDir
        )
    });
    if escapes {
        return Err(NotebookError::InvalidLocation(location.to_path_buf()));
    }
    Ok(())
}

fn category_for<'a>(filetypes: &'a BTreeMap<String, String>, basename: &OsStr) -> Option<&'a str> {
    let name = basename.to_string_lossy().to_lowercase();
    filetypes
        .iter()
        .filter(|(ext, _)| ext.as_str() != WILDCARD_FILETYPE)
        .filter(|(ext, _)| name.ends_with(&format!(".{}", ext.to_lowercase())))
        .max_by_key(|(ext, _)| ext.len())
        .or_else(|| filetypes.get_key_value(WILDCARD_FILETYPE))
        .map(|(_, category)| category.as_str())
}

fn ends_with_separator(path: &Path) -> bool {
    let text = path.as_os_str().to_string_lossy();
    text.is_empty() || text.ends_with(std::path::MAIN_SEPARATOR) || text.ends_with('/')
}

/// Fails with `DestinationExists` when `dest` exists and `overwrite` is false.
pub fn check_conflict(dest: &Path, overwrite: bool) -> NotebookResult<()> {
    let dest = strip_trailing_separator(dest);
    if !overwrite && dest.symlink_metadata().is_ok() {
        return Err(NotebookError::DestinationExists(dest));
    }
    Ok(())
}

/// Creates every missing parent directory of `path`.
pub fn ensure_parent_dirs(path: &Path) -> NotebookResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|err| NotebookError::io(parent, err))
        }
        _ => Ok(()),
    }
}

/// Places `source` at `dest` with the requested mode.
pub fn place(source: &Path, dest: &Path, mode: PlacementMode, overwrite: bool) -> NotebookResult<PathBuf> {
    check_conflict(dest, overwrite)?;
    let source = std::fs::canonicalize(source).map_err(|err| NotebookError::io(source, err))?;
    let dest = strip_trailing_separator(dest);
    remove_existing(&dest)?;
    ensure_parent_dirs(&dest)?;

    match mode {
        PlacementMode::Copy => copy_tree(&source, &dest)?,
        PlacementMode::HardLink => link_tree(&source, &dest)?,
        PlacementMode::Symlink => {
            let parent = dest.parent().unwrap_or_else(|| Path::new(""));
            let parent = std::fs::canonicalize(parent).map_err(|err| NotebookError::io(parent, err))?;
            let target = relative_path(&source, &parent);
            symlink(&target, &dest, source.is_dir()).map_err(|err| NotebookError::io(&dest, err))?;
        }
    }

    info!(
        "event=place_file module=placement status=ok mode={}",
        mode.as_str()
    );
    Ok(dest)
}

/// Recursively copies a file or directory tree, following symlinks.
pub fn copy_tree(source: &Path, dest: &Path) -> NotebookResult<()> {
    for_each_entry(source, dest, |from, to| {
        std::fs::copy(from, to).map(|_| ())
    })
}

fn link_tree(source: &Path, dest: &Path) -> NotebookResult<()> {
    for_each_entry(source, dest, |from, to| std::fs::hard_link(from, to))
}

fn for_each_entry(
    source: &Path,
    dest: &Path,
    mut place_file: impl FnMut(&Path, &Path) -> io::Result<()>,
) -> NotebookResult<()> {
    // Symlinked entries are placed by content; the file store keeps
    // directory symlinks from `symlink_in`.
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(source).to_path_buf();
            NotebookError::io(&path, io::Error::other(err))
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| NotebookError::io(entry.path(), io::Error::other(err)))?;
        let target = if relative.as_os_str().is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(relative)
        };

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|err| NotebookError::io(&target, err))?;
        } else {
            ensure_parent_dirs(&target)?;
            place_file(entry.path(), &target).map_err(|err| NotebookError::io(&target, err))?;
        }
    }
    Ok(())
}

fn remove_existing(dest: &Path) -> NotebookResult<()> {
    let Ok(metadata) = dest.symlink_metadata() else {
        return Ok(());
    };
    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(dest)
    } else {
        std::fs::remove_file(dest)
    };
    result.map_err(|err| NotebookError::io(dest, err))
}

fn strip_trailing_separator(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Path of `target` relative to directory `base`; both must be absolute.
fn relative_path(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component<'_>> = target.components().collect();
    let base: Vec<Component<'_>> = base.components().collect();
    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for component in &target[common..] {
        relative.push(component.as_os_str());
    }
    relative
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path, _is_dir: bool) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}
