//! Tracked note/appendix record.
//!
//! # Responsibility
//! - Map one markup source file to its derived HTML and PDF artifacts.
//! - Track modification times used by incremental PDF regeneration.
//!
//! # Invariants
//! - `slug` is derived once from the source file name and never changes.
//! - A missing PDF is an explicit `None`, always older than any source mtime.
//! - `update` fails once the source file is gone.

use crate::error::{NotebookError, NotebookResult};
use crate::external::{PdfConverter, PdfOptions};
use crate::layout::{NotebookPaths, APPENDIX_DIR, HTML_DIR, HTML_PAGE_DIR, NOTE_DIR, PDF_DIR};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

/// Date placeholder used for appendices and discovered files.
pub const UNKNOWN_DATE: &str = "????-??-??";

/// Supported source markup, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkupKind {
    Markdown,
    ReStructuredText,
    Html,
}

impl MarkupKind {
    pub const ALL: [MarkupKind; 3] = [Self::Markdown, Self::ReStructuredText, Self::Html];

    /// File extension (without dot) used for this markup.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::ReStructuredText => "rst",
            Self::Html => "html",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.extension() == ext)
    }

    /// Infers markup from a path's extension.
    pub fn from_path(path: &Path) -> NotebookResult<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| NotebookError::UnrecognizedFormat(path.display().to_string()))
    }
}

impl FromStr for MarkupKind {
    type Err = NotebookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s.trim().trim_start_matches('.'))
            .ok_or_else(|| NotebookError::UnrecognizedFormat(s.to_string()))
    }
}

impl Display for MarkupKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Which registry (and output subtree) a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Note,
    Appendix,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Appendix => "appendix",
        }
    }

    /// Source subtree, relative to the notebook location.
    pub fn source_dir(self) -> &'static str {
        match self {
            Self::Note => NOTE_DIR,
            Self::Appendix => APPENDIX_DIR,
        }
    }

    fn from_source_path(src_path: &Path) -> Self {
        match src_path.components().next() {
            Some(Component::Normal(first)) if first == NOTE_DIR => Self::Note,
            _ => Self::Appendix,
        }
    }
}

/// One tracked note or appendix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Display name.
    pub name: String,
    /// ISO date (optionally with time) or [`UNKNOWN_DATE`].
    pub date: String,
    /// Source path relative to the notebook location.
    pub src_path: PathBuf,
    pub markup: MarkupKind,
    pub slug: String,
    pub kind: ContentKind,
    /// Source mtime observed by the last `update`.
    pub src_modified: SystemTime,
    /// Set when the expected HTML artifact existed at the last `update`.
    pub html_path: Option<PathBuf>,
    /// Set when the expected PDF artifact existed at the last `update`.
    pub pdf_path: Option<PathBuf>,
    /// `None` until a PDF exists.
    pub pdf_modified: Option<SystemTime>,
}

impl ContentRecord {
    /// Builds a record for `src_path` and immediately refreshes its state.
    ///
    /// # Errors
    /// - `UnrecognizedFormat` when the extension is not `md`, `rst` or `html`.
    /// - `SourceMissing` when the source file does not exist.
    pub fn new(
        name: impl Into<String>,
        date: impl Into<String>,
        src_path: impl Into<PathBuf>,
        paths: &NotebookPaths,
    ) -> NotebookResult<Self> {
        let src_path = src_path.into();
        let markup = MarkupKind::from_path(&src_path)?;
        let slug = src_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| NotebookError::UnrecognizedFormat(src_path.display().to_string()))?
            .to_string();

        let mut record = Self {
            name: name.into(),
            date: date.into(),
            kind: ContentKind::from_source_path(&src_path),
            src_path,
            markup,
            slug,
            src_modified: SystemTime::UNIX_EPOCH,
            html_path: None,
            pdf_path: None,
            pdf_modified: None,
        };
        record.update(paths)?;
        Ok(record)
    }

    /// Expected HTML artifact, relative to the notebook location.
    pub fn expected_html_path(&self) -> PathBuf {
        let file_name = format!("{}.html", self.slug);
        match self.kind {
            ContentKind::Note => Path::new(HTML_DIR).join(NOTE_DIR).join(file_name),
            ContentKind::Appendix => Path::new(HTML_DIR).join(HTML_PAGE_DIR).join(file_name),
        }
    }

    /// Expected PDF artifact, relative to the notebook location.
    pub fn expected_pdf_path(&self) -> PathBuf {
        Path::new(PDF_DIR).join(format!("{}.pdf", self.slug))
    }

    /// Re-reads source and artifact state from disk.
    pub fn update(&mut self, paths: &NotebookPaths) -> NotebookResult<()> {
        let source = paths.resolve(&self.src_path);
        let metadata = match std::fs::metadata(&source) {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(NotebookError::SourceMissing(self.src_path.clone())),
        };
        self.src_modified = metadata
            .modified()
            .map_err(|err| NotebookError::io(&source, err))?;

        let html = self.expected_html_path();
        self.html_path = paths.resolve(&html).is_file().then_some(html);

        let pdf = self.expected_pdf_path();
        match std::fs::metadata(paths.resolve(&pdf)) {
            Ok(metadata) if metadata.is_file() => {
                self.pdf_modified = Some(
                    metadata
                        .modified()
                        .map_err(|err| NotebookError::io(paths.resolve(&pdf), err))?,
                );
                self.pdf_path = Some(pdf);
            }
            _ => {
                self.pdf_path = None;
                self.pdf_modified = None;
            }
        }
        Ok(())
    }

    /// Whether the PDF is missing or older than the source.
    pub fn needs_pdf(&self) -> bool {
        match self.pdf_modified {
            Some(pdf_modified) => pdf_modified < self.src_modified,
            None => true,
        }
    }

    /// Converts the current HTML artifact into the expected PDF path.
    ///
    /// Does not refresh state; callers run `update` afterwards.
    pub fn render_pdf(
        &self,
        paths: &NotebookPaths,
        converter: &dyn PdfConverter,
        options: &PdfOptions,
    ) -> NotebookResult<()> {
        let html = self
            .html_path
            .as_ref()
            .ok_or_else(|| NotebookError::HtmlMissing(self.slug.clone()))?;
        let dest = paths.resolve(self.expected_pdf_path());
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|err| NotebookError::io(parent, err))?;
        }
        converter.convert(&paths.resolve(html), &dest, options)?;
        Ok(())
    }

    /// Outline label used in the master PDF.
    pub fn bookmark_label(&self) -> String {
        match self.kind {
            ContentKind::Note => format!("{} {}", self.date, self.name),
            ContentKind::Appendix => format!("Appendix: {}", self.name),
        }
    }
}
