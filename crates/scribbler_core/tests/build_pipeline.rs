use filetime::{set_file_mtime, FileTime};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use scribbler_core::external::{RenderRequest, ToolError, ToolResult};
use scribbler_core::{
    BuildPhase, BuildTools, MarkupKind, Notebook, NotebookError, PdfConverter, PdfOptions,
    SiteRenderer,
};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

/// Writes one HTML page per staged source plus the index page.
struct FakeRenderer {
    html_dir: PathBuf,
    fail: bool,
    seen: Rc<RefCell<Vec<String>>>,
    staged_files: Rc<RefCell<Vec<PathBuf>>>,
}

impl SiteRenderer for FakeRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> ToolResult<()> {
        assert!(request.config_path.is_file(), "config staged before render");
        let config = std::fs::read_to_string(request.config_path).unwrap();
        assert!(config.contains("OUTPUT_PATH = "));
        if self.fail {
            return Err(ToolError::NonZeroExit {
                program: "pelican".to_string(),
                code: Some(1),
                stderr: "CRITICAL: boom".to_string(),
            });
        }

        let store = request.content_root.join("files");
        for entry in walkdir::WalkDir::new(&store).into_iter().flatten() {
            if entry.file_type().is_file() {
                let relative = entry.path().strip_prefix(&store).unwrap().to_path_buf();
                self.staged_files.borrow_mut().push(relative);
            }
        }

        for (subtree, output) in [("notes", "notes"), ("appendices", "pages")] {
            let root = request.content_root.join(subtree);
            for entry in walkdir::WalkDir::new(&root).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let stem = entry.path().file_stem().unwrap().to_string_lossy().into_owned();
                self.seen.borrow_mut().push(stem.clone());
                let dest = self.html_dir.join(output).join(format!("{stem}.html"));
                std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
                std::fs::write(dest, format!("<html>{stem}</html>")).unwrap();
            }
        }
        std::fs::create_dir_all(&self.html_dir).unwrap();
        std::fs::write(self.html_dir.join("index.html"), "<html>index</html>").unwrap();
        Ok(())
    }
}

/// Produces a one-page PDF naming the source file.
struct FakeConverter {
    calls: Rc<RefCell<Vec<PathBuf>>>,
}

impl PdfConverter for FakeConverter {
    fn convert(&self, source: &Path, dest: &Path, options: &PdfOptions) -> ToolResult<()> {
        assert!(options.get("page-size").is_some());
        self.calls.borrow_mut().push(source.to_path_buf());
        let label = source.file_stem().unwrap().to_string_lossy().into_owned();
        write_single_page_pdf(dest, &label);
        Ok(())
    }
}

fn write_single_page_pdf(path: &Path, text: &str) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(text.as_bytes().to_vec(), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

struct Harness {
    _dir: tempfile::TempDir,
    notebook: Notebook,
    tools: BuildTools,
    rendered: Rc<RefCell<Vec<String>>>,
    staged_files: Rc<RefCell<Vec<PathBuf>>>,
    converted: Rc<RefCell<Vec<PathBuf>>>,
}

fn harness(fail_render: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut notebook = Notebook::create("Lab Book", dir.path()).unwrap();
    notebook
        .create_note("2015-10-19 20:17", "Second", MarkupKind::Markdown)
        .unwrap();
    notebook
        .create_note("2015-10-18 09:00", "First", MarkupKind::ReStructuredText)
        .unwrap();
    notebook
        .create_appendix("Glossary", MarkupKind::Html)
        .unwrap();

    let rendered = Rc::new(RefCell::new(Vec::new()));
    let converted = Rc::new(RefCell::new(Vec::new()));
    let staged_files = Rc::new(RefCell::new(Vec::new()));
    let tools = BuildTools::new(
        Box::new(FakeRenderer {
            html_dir: notebook.paths().html_dir(),
            fail: fail_render,
            seen: Rc::clone(&rendered),
            staged_files: Rc::clone(&staged_files),
        }),
        Box::new(FakeConverter {
            calls: Rc::clone(&converted),
        }),
    );
    Harness {
        _dir: dir,
        notebook,
        tools,
        rendered,
        staged_files,
        converted,
    }
}

fn pdf_mtime(notebook: &Notebook, slug: &str) -> SystemTime {
    std::fs::metadata(notebook.paths().pdf_dir().join(format!("{slug}.pdf")))
        .unwrap()
        .modified()
        .unwrap()
}

fn outline_titles(doc: &Document) -> Vec<String> {
    let catalog = doc.catalog().unwrap();
    let outlines_id = catalog.get(b"Outlines").unwrap().as_reference().unwrap();
    let mut next = doc
        .get_dictionary(outlines_id)
        .unwrap()
        .get(b"First")
        .and_then(Object::as_reference)
        .ok();
    let mut titles = Vec::new();
    while let Some(id) = next {
        let item = doc.get_dictionary(id).unwrap();
        let title = item.get(b"Title").unwrap().as_str().unwrap();
        titles.push(String::from_utf8_lossy(title).into_owned());
        next = item.get(b"Next").and_then(Object::as_reference).ok();
    }
    titles
}

#[test]
fn build_produces_item_pdfs_and_master_in_slug_order() {
    let mut h = harness(false);
    let report = h.notebook.build(&h.tools, false).unwrap();

    assert_eq!(
        report.converted,
        vec![
            "2015-10-18-first".to_string(),
            "2015-10-19-second".to_string(),
            "glossary".to_string(),
        ]
    );
    assert_eq!(report.master_pages, 4);
    assert_eq!(report.master_pdf, h.notebook.paths().master_pdf());
    assert!(report.warnings.is_empty());
    assert_eq!(h.notebook.phase(), BuildPhase::Clean);
    assert_eq!(h.rendered.borrow().len(), 3);

    let paths = h.notebook.paths().clone();
    assert!(!paths.renderer_config_file().exists());
    assert!(!paths.staging_dir().exists());
    assert!(paths.title_pdf().is_file());
    assert_eq!(
        h.converted.borrow().last().unwrap(),
        &paths.index_html(),
        "title page converted after the items"
    );

    let master = Document::load(paths.master_pdf()).unwrap();
    assert_eq!(master.get_pages().len(), 4);
    assert_eq!(
        outline_titles(&master),
        vec![
            "Lab Book".to_string(),
            "2015-10-18 09:00 First".to_string(),
            "2015-10-19 20:17 Second".to_string(),
            "Appendix: Glossary".to_string(),
        ]
    );

    for record in h.notebook.notes().values().chain(h.notebook.appendices().values()) {
        assert!(record.html_path.is_some());
        assert!(!record.needs_pdf());
    }
    let reopened = Notebook::open(paths.location()).unwrap();
    assert_eq!(reopened.notes(), h.notebook.notes());
}

#[test]
fn rebuild_only_regenerates_touched_items() {
    let mut h = harness(false);
    h.notebook.build(&h.tools, false).unwrap();
    let first = pdf_mtime(&h.notebook, "2015-10-18-first");
    let second = pdf_mtime(&h.notebook, "2015-10-19-second");
    let glossary = pdf_mtime(&h.notebook, "glossary");

    let report = h.notebook.build(&h.tools, false).unwrap();
    assert!(report.converted.is_empty());
    assert_eq!(pdf_mtime(&h.notebook, "2015-10-18-first"), first);
    assert_eq!(pdf_mtime(&h.notebook, "2015-10-19-second"), second);
    assert_eq!(pdf_mtime(&h.notebook, "glossary"), glossary);

    // Age the PDF so its source looks edited since the last conversion.
    let pdf_time = FileTime::from_system_time(second);
    let pdf = h.notebook.paths().pdf_dir().join("2015-10-19-second.pdf");
    set_file_mtime(&pdf, FileTime::from_unix_time(pdf_time.unix_seconds() - 100, 0)).unwrap();
    let stale = pdf_mtime(&h.notebook, "2015-10-19-second");

    let report = h.notebook.build(&h.tools, false).unwrap();
    assert_eq!(report.converted, vec!["2015-10-19-second".to_string()]);
    assert_ne!(pdf_mtime(&h.notebook, "2015-10-19-second"), stale);
    assert_eq!(pdf_mtime(&h.notebook, "2015-10-18-first"), first);
    assert_eq!(pdf_mtime(&h.notebook, "glossary"), glossary);
}

#[test]
fn renderer_failure_aborts_and_cleans_staging() {
    let mut h = harness(true);
    let err = h.notebook.build(&h.tools, true).unwrap_err();

    assert!(matches!(
        err,
        NotebookError::Tool(ToolError::NonZeroExit { code: Some(1), .. })
    ));
    assert_eq!(h.notebook.phase(), BuildPhase::Clean);
    assert!(h.converted.borrow().is_empty());
    let paths = h.notebook.paths();
    assert!(!paths.renderer_config_file().exists());
    assert!(!paths.staging_dir().exists());
    assert!(!paths.master_pdf().exists());
}

#[test]
fn unrecognized_settings_are_reported_as_warnings() {
    let mut h = harness(false);
    let config = h.notebook.paths().settings_file();
    std::fs::write(&config, "notebook name: Lab Book\nfavourite colour: green\n").unwrap();
    let metadata = std::fs::metadata(&config).unwrap();
    let mtime = FileTime::from_last_modification_time(&metadata);
    set_file_mtime(&config, FileTime::from_unix_time(mtime.unix_seconds() + 10, 0)).unwrap();

    let report = h.notebook.build(&h.tools, false).unwrap();
    assert_eq!(report.warnings, vec!["favourite colour".to_string()]);
}

#[test]
fn sources_added_on_disk_are_picked_up_by_build() {
    let mut h = harness(false);
    std::fs::write(
        h.notebook.paths().resolve("appendices/extra.md"),
        "Title: Extra\n",
    )
    .unwrap();

    let report = h.notebook.build(&h.tools, false).unwrap();
    assert!(report.converted.contains(&"extra".to_string()));
    assert_eq!(report.master_pages, 5);
    assert_eq!(h.notebook.appendices()["extra.md"].name, "extra");
}

#[cfg(unix)]
#[test]
fn symlinked_store_directories_are_staged_by_content() {
    let mut h = harness(false);
    let outside = tempfile::tempdir().unwrap();
    let dataset = outside.path().join("dataset");
    std::fs::create_dir_all(dataset.join("raw")).unwrap();
    std::fs::write(dataset.join("raw/values.csv"), "1,2,3\n").unwrap();

    let link = h
        .notebook
        .symlink_in(&dataset, Some(Path::new("data/")), false)
        .unwrap();
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());

    h.notebook.build(&h.tools, false).unwrap();
    assert_eq!(
        *h.staged_files.borrow(),
        vec![PathBuf::from("data/dataset/raw/values.csv")]
    );
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    assert!(!h.notebook.paths().staging_dir().exists());
}
