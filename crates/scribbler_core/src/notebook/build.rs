//! Full notebook build: HTML render, incremental PDFs, master PDF.
//!
//! # Responsibility
//! - Drive the renderer and converter in a fixed, sequential order.
//! - Regenerate only PDFs older than their sources.
//!
//! # Invariants
//! - Items are converted one at a time in ascending slug order.
//! - The first failing step aborts the build; finished artifacts stay.
//! - The phase is back to `Clean` when `build` returns, on success or error.

use super::Notebook;
use crate::error::{NotebookError, NotebookResult};
use crate::external::{BuildTools, RenderRequest};
use crate::layout::{APPENDIX_DIR, FILE_STORE_DIR, INDEX_HTML_FILE, NOTE_DIR};
use crate::model::content::ContentKind;
use crate::pdf::{merge_pdfs, MergeItem, PdfMetadata};
use crate::placement::copy_tree;
use crate::settings::pdf_options;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

/// Where a running build currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildPhase {
    #[default]
    Clean,
    Reconciling,
    Rendering,
    Converting,
    Merging,
}

impl BuildPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Reconciling => "reconciling",
            Self::Rendering => "rendering",
            Self::Converting => "converting",
            Self::Merging => "merging",
        }
    }
}

/// Outcome of one successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub run_id: Uuid,
    /// Slugs whose PDF was regenerated, in conversion order.
    pub converted: Vec<String>,
    pub master_pdf: PathBuf,
    pub master_pages: usize,
    /// Settings the renderer configuration did not recognize.
    pub warnings: Vec<String>,
}

impl Notebook {
    /// Renders HTML, refreshes stale PDFs and rebuilds the master PDF.
    ///
    /// # Errors
    /// - `Tool` when the renderer or converter fails or cannot start.
    /// - `HtmlMissing` when an item or the index page was not rendered.
    /// - `Pdf` when merging fails.
    pub fn build(&mut self, tools: &BuildTools, debug: bool) -> NotebookResult<BuildReport> {
        let run_id = Uuid::new_v4();
        let started_at = Instant::now();
        info!("event=build module=notebook status=start run_id={run_id} debug={debug}");

        let result = self.run_build(tools, debug, run_id);
        let failed_phase = self.phase;
        self.phase = BuildPhase::Clean;

        match &result {
            Ok(report) => info!(
                "event=build module=notebook status=ok run_id={run_id} converted={} pages={} duration_ms={}",
                report.converted.len(),
                report.master_pages,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=build module=notebook status=error run_id={run_id} phase={} duration_ms={} error={err}",
                failed_phase.as_str(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    fn run_build(&mut self, tools: &BuildTools, debug: bool, run_id: Uuid) -> NotebookResult<BuildReport> {
        self.phase = BuildPhase::Rendering;
        let settings = self.settings()?;
        let config = self.renderer_config()?;
        let warnings = config.unrecognized.clone();

        let config_path = self.paths.renderer_config_file();
        std::fs::write(&config_path, config.to_python_module())
            .map_err(|err| NotebookError::io(&config_path, err))?;
        let staging = self.paths.staging_dir();
        let staged = self.stage_content(&staging);
        let rendered = staged.and_then(|()| {
            let request = RenderRequest {
                config_path: &config_path,
                content_root: &staging,
                debug,
            };
            tools.renderer.render(&request).map_err(NotebookError::from)
        });
        remove_best_effort(&config_path);
        remove_best_effort(&staging);
        rendered?;

        self.phase = BuildPhase::Reconciling;
        self.reconcile()?;

        self.phase = BuildPhase::Converting;
        let options = pdf_options(&settings);
        let mut order: Vec<(String, ContentKind, String)> = self
            .notes
            .iter()
            .map(|(key, record)| (record.slug.clone(), ContentKind::Note, key.clone()))
            .chain(
                self.appendices
                    .iter()
                    .map(|(key, record)| (record.slug.clone(), ContentKind::Appendix, key.clone())),
            )
            .collect();
        order.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));

        let mut converted = Vec::new();
        for (slug, kind, key) in order {
            let paths = &self.paths;
            let records = match kind {
                ContentKind::Note => &mut self.notes,
                ContentKind::Appendix => &mut self.appendices,
            };
            let Some(record) = records.get_mut(&key) else {
                continue;
            };
            if !record.needs_pdf() {
                continue;
            }
            let item_started = Instant::now();
            record.render_pdf(paths, tools.converter.as_ref(), &options)?;
            record.update(paths)?;
            info!(
                "event=convert_item module=notebook status=ok run_id={run_id} kind={} duration_ms={}",
                kind.as_str(),
                item_started.elapsed().as_millis()
            );
            converted.push(slug);
        }

        let index = self.paths.index_html();
        if !index.is_file() {
            return Err(NotebookError::HtmlMissing(INDEX_HTML_FILE.to_string()));
        }
        let title_pdf = self.paths.title_pdf();
        std::fs::create_dir_all(self.paths.pdf_dir())
            .map_err(|err| NotebookError::io(self.paths.pdf_dir(), err))?;
        tools.converter.convert(&index, &title_pdf, &options)?;

        self.phase = BuildPhase::Merging;
        let mut items = vec![MergeItem::new(&title_pdf, settings.notebook_name())];
        items.extend(self.merge_items(ContentKind::Note));
        items.extend(self.merge_items(ContentKind::Appendix));
        let metadata = PdfMetadata {
            title: settings.notebook_name().to_string(),
            author: settings.author().to_string(),
        };
        let master_pdf = self.paths.master_pdf();
        let master_pages = merge_pdfs(&items, &metadata, &master_pdf)?;

        self.phase = BuildPhase::Reconciling;
        self.reconcile()?;
        self.persist()?;

        Ok(BuildReport {
            run_id,
            converted,
            master_pdf,
            master_pages,
            warnings,
        })
    }

    /// Copies notes, appendices and the file store under one content root.
    fn stage_content(&self, staging: &Path) -> NotebookResult<()> {
        remove_best_effort(staging);
        std::fs::create_dir_all(staging).map_err(|err| NotebookError::io(staging, err))?;
        for subtree in [NOTE_DIR, APPENDIX_DIR, FILE_STORE_DIR] {
            let source = self.paths.resolve(subtree);
            if source.is_dir() {
                copy_tree(&source, &staging.join(subtree))?;
            }
        }
        Ok(())
    }

    /// Merge inputs for one registry, ordered by slug.
    fn merge_items(&self, kind: ContentKind) -> Vec<MergeItem> {
        let mut records: Vec<_> = self.registry(kind).values().collect();
        records.sort_by(|a, b| a.slug.cmp(&b.slug));
        records
            .into_iter()
            .filter_map(|record| match &record.pdf_path {
                Some(pdf) => Some(MergeItem::new(self.paths.resolve(pdf), record.bookmark_label())),
                None => {
                    warn!(
                        "event=pdf_merge module=notebook status=warn reason=missing_pdf kind={}",
                        kind.as_str()
                    );
                    None
                }
            })
            .collect()
    }
}

fn remove_best_effort(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(err) = result {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("event=cleanup module=notebook status=warn error={err}");
        }
    }
}
