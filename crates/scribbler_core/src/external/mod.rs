//! Boundaries to the external HTML renderer and HTML→PDF converter.
//!
//! # Responsibility
//! - Define the call contracts the build pipeline drives.
//! - Provide subprocess-backed implementations for Pelican and wkhtmltopdf.
//!
//! # Invariants
//! - Calls block until the subprocess exits; there is no timeout.
//! - A non-zero exit status is always surfaced as an error.

mod pelican;
mod wkhtmltopdf;

pub use pelican::PelicanRenderer;
pub use wkhtmltopdf::WkhtmltopdfConverter;

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;

pub type ToolResult<T> = Result<T, ToolError>;

const MAX_STDERR_CHARS: usize = 400;

/// External tool failure.
#[derive(Debug)]
pub enum ToolError {
    /// Program could not be started (missing binary, permissions).
    Spawn { program: String, source: io::Error },
    /// Program ran and exited unsuccessfully.
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    /// Program exited successfully but did not produce its output.
    MissingOutput { program: String, path: PathBuf },
}

impl Display for ToolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn { program, source } => write!(f, "failed to run `{program}`: {source}"),
            Self::NonZeroExit {
                program,
                code,
                stderr,
            } => match code {
                Some(code) => write!(f, "`{program}` exited with status {code}: {stderr}"),
                None => write!(f, "`{program}` was terminated by a signal: {stderr}"),
            },
            Self::MissingOutput { program, path } => write!(
                f,
                "`{program}` did not produce `{}`",
                path.display()
            ),
        }
    }
}

impl Error for ToolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Inputs for one renderer invocation.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// Generated renderer configuration artifact.
    pub config_path: &'a Path,
    /// Single content root containing notes, appendices and the file store.
    pub content_root: &'a Path,
    /// Forwarded verbatim to the renderer.
    pub debug: bool,
}

/// Static-site generator turning a content tree into HTML.
pub trait SiteRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> ToolResult<()>;
}

/// HTML→PDF conversion boundary.
pub trait PdfConverter {
    fn convert(&self, source: &Path, dest: &Path, options: &PdfOptions) -> ToolResult<()>;
}

/// Flat conversion flags; `None` values are switches without an argument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfOptions {
    flags: BTreeMap<String, Option<String>>,
}

impl PdfOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, flag: impl Into<String>, value: Option<String>) {
        self.flags.insert(flag.into(), value);
    }

    pub fn get(&self, flag: &str) -> Option<&Option<String>> {
        self.flags.get(flag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<String>)> {
        self.flags.iter()
    }

    /// Renders flags as `--name [value]` command-line arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.flags.len() * 2);
        for (flag, value) in &self.flags {
            args.push(format!("--{flag}"));
            if let Some(value) = value {
                args.push(value.clone());
            }
        }
        args
    }
}

/// Renderer and converter used by one build.
pub struct BuildTools {
    pub renderer: Box<dyn SiteRenderer>,
    pub converter: Box<dyn PdfConverter>,
}

impl BuildTools {
    pub fn new(renderer: Box<dyn SiteRenderer>, converter: Box<dyn PdfConverter>) -> Self {
        Self {
            renderer,
            converter,
        }
    }

    /// Pelican and wkhtmltopdf resolved from `PATH`.
    pub fn system() -> Self {
        Self::new(
            Box::new(PelicanRenderer::new()),
            Box::new(WkhtmltopdfConverter::new()),
        )
    }
}

fn check_status(program: &str, output: &Output) -> ToolResult<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ToolError::NonZeroExit {
        program: program.to_string(),
        code: output.status.code(),
        stderr: summarize_stderr(&stderr),
    })
}

fn summarize_stderr(value: &str) -> String {
    let normalized = value.trim().replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(MAX_STDERR_CHARS).collect::<String>();
    if normalized.chars().count() > MAX_STDERR_CHARS {
        truncated.push_str("...");
    }
    truncated
}
