//! Core of the scribbler notebook: content tracking and build orchestration.
//! Callers hold a [`Notebook`] handle; there is no process-wide "current"
//! notebook.

pub mod db;
pub mod error;
pub mod external;
pub mod layout;
pub mod logging;
pub mod model;
pub mod notebook;
pub mod pdf;
pub mod placement;
pub mod repo;
pub mod settings;

pub use error::{NotebookError, NotebookResult};
pub use external::{
    BuildTools, PdfConverter, PdfOptions, PelicanRenderer, RenderRequest, SiteRenderer, ToolError,
    WkhtmltopdfConverter,
};
pub use layout::NotebookPaths;
pub use logging::{init_logging, logging_status, LogLevel, LoggingError};
pub use model::content::{ContentKind, ContentRecord, MarkupKind, UNKNOWN_DATE};
pub use notebook::{BuildPhase, BuildReport, Notebook};
pub use placement::{ensure_parent_dirs, resolve_destination, PlacementMode};
pub use repo::registry_repo::{
    NotebookSnapshot, RegistryStore, RepoError, RepoResult, SqliteRegistryStore,
};
pub use settings::{ConfigValue, RendererConfig, Settings};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
