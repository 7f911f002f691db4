//! On-disk layout of one notebook directory.
//!
//! # Responsibility
//! - Name every directory and file the core reads or writes.
//! - Resolve those names against the absolute notebook location.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Note sources.
pub const NOTE_DIR: &str = "notes";
/// Appendix (page) sources.
pub const APPENDIX_DIR: &str = "appendices";
/// Rendered HTML output.
pub const HTML_DIR: &str = "html";
/// Rendered HTML subdirectory for appendices.
pub const HTML_PAGE_DIR: &str = "pages";
/// Flat per-item PDF output.
pub const PDF_DIR: &str = "pdf";
/// File store for images, archives and other attachments.
pub const FILE_STORE_DIR: &str = "files";
/// User-editable settings.
pub const SETTINGS_FILE: &str = "notebook.yml";
/// Generated renderer configuration, removed after each render.
pub const RENDERER_CONFIG_FILE: &str = ".__pelicanconf__.py";
/// Staging content root handed to the renderer.
pub const STAGING_DIR: &str = ".__content__";
/// Renderer cache directory.
pub const RENDERER_CACHE_DIR: &str = ".__cache__";
/// Persisted registry.
pub const REGISTRY_FILE: &str = ".__notebook__.db";
/// Merged master document.
pub const MASTER_PDF_FILE: &str = "notebook.pdf";
/// Title page PDF inside the PDF directory.
pub const TITLE_PDF_FILE: &str = ".__title__.pdf";
/// Rendered notebook index page inside the HTML directory.
pub const INDEX_HTML_FILE: &str = "index.html";

/// Absolute paths of one notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookPaths {
    location: PathBuf,
}

impl NotebookPaths {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Resolves a notebook-relative path.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.location.join(relative)
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.location.join(NOTE_DIR)
    }

    pub fn appendices_dir(&self) -> PathBuf {
        self.location.join(APPENDIX_DIR)
    }

    pub fn html_dir(&self) -> PathBuf {
        self.location.join(HTML_DIR)
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.location.join(PDF_DIR)
    }

    pub fn file_store_dir(&self) -> PathBuf {
        self.location.join(FILE_STORE_DIR)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.location.join(SETTINGS_FILE)
    }

    pub fn renderer_config_file(&self) -> PathBuf {
        self.location.join(RENDERER_CONFIG_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.location.join(STAGING_DIR)
    }

    pub fn renderer_cache_dir(&self) -> PathBuf {
        self.location.join(RENDERER_CACHE_DIR)
    }

    pub fn registry_file(&self) -> PathBuf {
        self.location.join(REGISTRY_FILE)
    }

    pub fn master_pdf(&self) -> PathBuf {
        self.location.join(MASTER_PDF_FILE)
    }

    pub fn title_pdf(&self) -> PathBuf {
        self.pdf_dir().join(TITLE_PDF_FILE)
    }

    pub fn index_html(&self) -> PathBuf {
        self.html_dir().join(INDEX_HTML_FILE)
    }

    /// Directories created when a notebook is scaffolded.
    pub fn scaffold_dirs(&self) -> [PathBuf; 5] {
        [
            self.notes_dir(),
            self.appendices_dir(),
            self.html_dir(),
            self.pdf_dir(),
            self.file_store_dir(),
        ]
    }
}
