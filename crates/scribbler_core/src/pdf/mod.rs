//! Master PDF assembly.
//!
//! # Responsibility
//! - Concatenate per-item PDFs into one document in the given order.
//! - Add one top-level bookmark per input pointing at its first page.
//! - Record notebook title and author in the document information.
//!
//! # Invariants
//! - Output page count equals the sum of the input page counts.
//! - Every copied object is copied once per input document.

use log::{error, info};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub type PdfResult<T> = Result<T, PdfError>;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE_PAGE_KEYS: &[&[u8]] = &[b"Resources", b"MediaBox", b"CropBox", b"Rotate"];
const MAX_PAGE_TREE_DEPTH: usize = 64;

#[derive(Debug)]
pub enum PdfError {
    /// An input document could not be read or parsed.
    Load { path: PathBuf, source: lopdf::Error },
    /// An input document has a broken page tree.
    Structure { path: PathBuf, source: lopdf::Error },
    /// The merged document could not be written.
    Save { path: PathBuf, message: String },
}

impl Display for PdfError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load { path, source } => write!(f, "cannot read PDF `{}`: {source}", path.display()),
            Self::Structure { path, source } => {
                write!(f, "malformed PDF `{}`: {source}", path.display())
            }
            Self::Save { path, message } => {
                write!(f, "cannot write PDF `{}`: {message}", path.display())
            }
        }
    }
}

impl Error for PdfError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Load { source, .. } | Self::Structure { source, .. } => Some(source),
            Self::Save { .. } => None,
        }
    }
}

/// One input of the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeItem {
    pub path: PathBuf,
    pub label: String,
}

impl MergeItem {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }
}

/// Document information written to the merged PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfMetadata {
    pub title: String,
    pub author: String,
}

/// Merges `items` in order into `dest` and returns the total page count.
pub fn merge_pdfs(items: &[MergeItem], metadata: &PdfMetadata, dest: &Path) -> PdfResult<usize> {
    let started_at = Instant::now();
    info!(
        "event=pdf_merge module=pdf status=start inputs={}",
        items.len()
    );

    let result = merge_into(items, metadata, dest);
    match &result {
        Ok(pages) => info!(
            "event=pdf_merge module=pdf status=ok pages={pages} duration_ms={}",
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=pdf_merge module=pdf status=error duration_ms={} error={err}",
            started_at.elapsed().as_millis()
        ),
    }
    result
}

fn merge_into(items: &[MergeItem], metadata: &PdfMetadata, dest: &Path) -> PdfResult<usize> {
    let mut target = Document::with_version("1.5");
    let pages_id = target.new_object_id();
    let mut kids = Vec::new();
    let mut bookmarks = Vec::new();

    for item in items {
        let source = Document::load(&item.path).map_err(|source| PdfError::Load {
            path: item.path.clone(),
            source,
        })?;
        let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();
        let mut copier = ObjectCopier::new(&source, &mut target);
        copier.reserve_pages(&page_ids);
        let mut first_page = None;

        for page_id in page_ids {
            let new_page_id = copier
                .copy_page(page_id, pages_id)
                .map_err(|source| PdfError::Structure {
                    path: item.path.clone(),
                    source,
                })?;
            first_page.get_or_insert(new_page_id);
            kids.push(Object::Reference(new_page_id));
        }

        if let Some(page_id) = first_page {
            bookmarks.push((item.label.as_str(), page_id));
        }
    }

    let page_count = kids.len();
    target.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if let Some(outlines_id) = build_outlines(&mut target, &bookmarks) {
        catalog.set("Outlines", outlines_id);
        catalog.set("PageMode", "UseOutlines");
    }
    let catalog_id = target.add_object(catalog);
    let info_id = target.add_object(dictionary! {
        "Title" => text_string(&metadata.title),
        "Author" => text_string(&metadata.author),
        "Producer" => text_string("scribbler"),
    });
    target.trailer.set("Root", catalog_id);
    target.trailer.set("Info", info_id);

    let save_error = |message: String| PdfError::Save {
        path: dest.to_path_buf(),
        message,
    };
    let file = File::create(dest).map_err(|err| save_error(err.to_string()))?;
    let mut writer = BufWriter::new(file);
    target
        .save_to(&mut writer)
        .map_err(|err| save_error(err.to_string()))?;
    writer.flush().map_err(|err| save_error(err.to_string()))?;
    Ok(page_count)
}

/// Flat outline: one top-level entry per bookmark, in order.
fn build_outlines(doc: &mut Document, bookmarks: &[(&str, ObjectId)]) -> Option<ObjectId> {
    if bookmarks.is_empty() {
        return None;
    }
    let item_ids: Vec<ObjectId> = bookmarks.iter().map(|_| doc.new_object_id()).collect();
    let outlines_id = doc.add_object(dictionary! {
        "Type" => "Outlines",
        "First" => Object::Reference(item_ids[0]),
        "Last" => Object::Reference(item_ids[item_ids.len() - 1]),
        "Count" => item_ids.len() as i64,
    });

    for (index, ((label, page_id), item_id)) in bookmarks.iter().zip(&item_ids).enumerate() {
        let mut dict = dictionary! {
            "Title" => text_string(label),
            "Parent" => Object::Reference(outlines_id),
            "Dest" => vec![Object::Reference(*page_id), "Fit".into()],
        };
        if index > 0 {
            dict.set("Prev", Object::Reference(item_ids[index - 1]));
        }
        if let Some(next) = item_ids.get(index + 1) {
            dict.set("Next", Object::Reference(*next));
        }
        doc.objects.insert(*item_id, Object::Dictionary(dict));
    }
    Some(outlines_id)
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Copies objects from one document into another, remapping references.
struct ObjectCopier<'a> {
    source: &'a Document,
    target: &'a mut Document,
    id_map: HashMap<ObjectId, ObjectId>,
}

impl<'a> ObjectCopier<'a> {
    fn new(source: &'a Document, target: &'a mut Document) -> Self {
        Self {
            source,
            target,
            id_map: HashMap::new(),
        }
    }

    /// Maps every source page to a target id before any object is copied.
    ///
    /// Links and annotations reaching a page through a reference then land on
    /// the merged page instead of dragging in a copy of the source page tree.
    fn reserve_pages(&mut self, page_ids: &[ObjectId]) {
        for page_id in page_ids {
            self.target_id(*page_id);
        }
    }

    fn target_id(&mut self, source_id: ObjectId) -> ObjectId {
        if let Some(target_id) = self.id_map.get(&source_id) {
            return *target_id;
        }
        let target_id = self.target.new_object_id();
        self.id_map.insert(source_id, target_id);
        target_id
    }

    /// Copies one page without its source page tree, re-parenting it.
    fn copy_page(&mut self, page_id: ObjectId, parent_id: ObjectId) -> Result<ObjectId, lopdf::Error> {
        let mut page = self.source.get_object(page_id)?.as_dict()?.clone();
        for key in INHERITABLE_PAGE_KEYS {
            if !page.has(key) {
                if let Some(value) = self.inherited(&page, key)? {
                    page.set(key.to_vec(), value);
                }
            }
        }
        page.remove(b"Parent");

        let new_id = self.target_id(page_id);
        let mut page = self.remap_dict(page)?;
        page.set("Parent", Object::Reference(parent_id));
        self.target.objects.insert(new_id, Object::Dictionary(page));
        Ok(new_id)
    }

    fn inherited(&self, page: &Dictionary, key: &[u8]) -> Result<Option<Object>, lopdf::Error> {
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        for _ in 0..MAX_PAGE_TREE_DEPTH {
            let Some(id) = parent else {
                break;
            };
            let node = self.source.get_object(id)?.as_dict()?;
            if let Ok(value) = node.get(key) {
                return Ok(Some(value.clone()));
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        }
        Ok(None)
    }

    fn copy_object(&mut self, source_id: ObjectId) -> Result<ObjectId, lopdf::Error> {
        if let Some(target_id) = self.id_map.get(&source_id) {
            return Ok(*target_id);
        }
        // Reserve the id first so reference cycles terminate.
        let new_id = self.target_id(source_id);

        let object = self.source.get_object(source_id)?.clone();
        let object = self.remap(object)?;
        self.target.objects.insert(new_id, object);
        Ok(new_id)
    }

    fn remap(&mut self, object: Object) -> Result<Object, lopdf::Error> {
        match object {
            Object::Reference(id) => Ok(Object::Reference(self.copy_object(id)?)),
            Object::Array(items) => Ok(Object::Array(
                items
                    .into_iter()
                    .map(|item| self.remap(item))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Object::Dictionary(dict) => Ok(Object::Dictionary(self.remap_dict(dict)?)),
            Object::Stream(mut stream) => {
                stream.dict = self.remap_dict(stream.dict)?;
                Ok(Object::Stream(stream))
            }
            other => Ok(other),
        }
    }

    fn remap_dict(&mut self, mut dict: Dictionary) -> Result<Dictionary, lopdf::Error> {
        for (_, value) in dict.iter_mut() {
            let owned = std::mem::replace(value, Object::Null);
            *value = self.remap(owned)?;
        }
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_pdfs, text_string, MergeItem, PdfMetadata};
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream, StringFormat};
    use std::path::Path;

    /// One-font document with `pages` pages; media box lives on the page tree.
    fn write_fixture(path: &Path, pages: u32, text: &str) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for page in 1..=pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(
                            format!("{text} {page}").into_bytes(),
                            StringFormat::Literal,
                        )],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    fn outline_titles(doc: &Document) -> Vec<Vec<u8>> {
        let catalog = doc.catalog().unwrap();
        let outlines_id = catalog.get(b"Outlines").unwrap().as_reference().unwrap();
        let outlines = doc.get_dictionary(outlines_id).unwrap();
        let mut next = outlines.get(b"First").and_then(Object::as_reference).ok();
        let mut titles = Vec::new();
        while let Some(id) = next {
            let item = doc.get_dictionary(id).unwrap();
            titles.push(item.get(b"Title").unwrap().as_str().unwrap().to_vec());
            next = item.get(b"Next").and_then(Object::as_reference).ok();
        }
        titles
    }

    #[test]
    fn merged_document_keeps_order_pages_and_bookmarks() {
        let dir = tempfile::tempdir().unwrap();
        let title = dir.path().join("title.pdf");
        let note = dir.path().join("note.pdf");
        let page = dir.path().join("page.pdf");
        write_fixture(&title, 1, "Title");
        write_fixture(&note, 2, "Note");
        write_fixture(&page, 3, "Appendix");

        let dest = dir.path().join("notebook.pdf");
        let items = [
            MergeItem::new(&title, "My Notebook"),
            MergeItem::new(&note, "2015-10-19 20:17 Test Note"),
            MergeItem::new(&page, "Appendix: Reference"),
        ];
        let metadata = PdfMetadata {
            title: "My Notebook".to_string(),
            author: "Someone".to_string(),
        };
        assert_eq!(merge_pdfs(&items, &metadata, &dest).unwrap(), 6);

        let merged = Document::load(&dest).unwrap();
        let pages = merged.get_pages();
        assert_eq!(pages.len(), 6);
        let second = merged.get_page_content(pages[&2]).unwrap();
        assert!(String::from_utf8_lossy(&second).contains("Note 1"));
        let last = merged.get_page_content(pages[&6]).unwrap();
        assert!(String::from_utf8_lossy(&last).contains("Appendix 3"));

        let page_dict = merged.get_dictionary(pages[&1]).unwrap();
        assert!(page_dict.has(b"MediaBox"));

        assert_eq!(
            outline_titles(&merged),
            vec![
                b"My Notebook".to_vec(),
                b"2015-10-19 20:17 Test Note".to_vec(),
                b"Appendix: Reference".to_vec(),
            ]
        );

        let info_id = merged.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let info = merged.get_dictionary(info_id).unwrap();
        assert_eq!(info.get(b"Author").unwrap().as_str().unwrap(), b"Someone");
    }

    /// Two pages where page 1 carries a link annotation to page 2.
    fn write_linked_fixture(path: &Path) {
        write_fixture(path, 2, "Linked");
        let mut doc = Document::load(path).unwrap();
        let pages = doc.get_pages();
        let (first, second) = (pages[&1], pages[&2]);
        let link_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![72.into(), 700.into(), 200.into(), 720.into()],
            "P" => first,
            "Dest" => vec![Object::Reference(second), "Fit".into()],
        });
        doc.get_object_mut(first)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Annots", vec![Object::Reference(link_id)]);
        doc.save(path).unwrap();
    }

    fn count_page_trees(doc: &Document) -> usize {
        doc.objects
            .values()
            .filter(|object| {
                object
                    .as_dict()
                    .ok()
                    .and_then(|dict| dict.get(b"Type").ok())
                    .and_then(|kind| kind.as_name().ok())
                    == Some(b"Pages".as_slice())
            })
            .count()
    }

    #[test]
    fn forward_links_target_pages_of_the_merged_tree() {
        let dir = tempfile::tempdir().unwrap();
        let title = dir.path().join("title.pdf");
        let linked = dir.path().join("linked.pdf");
        write_fixture(&title, 1, "Title");
        write_linked_fixture(&linked);

        let dest = dir.path().join("notebook.pdf");
        let items = [MergeItem::new(&title, "N"), MergeItem::new(&linked, "Linked")];
        let metadata = PdfMetadata {
            title: "N".to_string(),
            author: "A".to_string(),
        };
        assert_eq!(merge_pdfs(&items, &metadata, &dest).unwrap(), 3);

        let merged = Document::load(&dest).unwrap();
        let pages = merged.get_pages();
        assert_eq!(pages.len(), 3);
        assert_eq!(count_page_trees(&merged), 1);

        let page = merged.get_dictionary(pages[&2]).unwrap();
        let annots = page.get(b"Annots").unwrap().as_array().unwrap();
        let link = merged
            .get_dictionary(annots[0].as_reference().unwrap())
            .unwrap();
        let dest_array = link.get(b"Dest").unwrap().as_array().unwrap();
        assert_eq!(dest_array[0].as_reference().unwrap(), pages[&3]);
        assert_eq!(link.get(b"P").unwrap().as_reference().unwrap(), pages[&2]);
    }

    #[test]
    fn missing_input_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("notebook.pdf");
        let metadata = PdfMetadata {
            title: "N".to_string(),
            author: "A".to_string(),
        };
        let items = [MergeItem::new(dir.path().join("absent.pdf"), "x")];
        assert!(merge_pdfs(&items, &metadata, &dest).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn non_ascii_titles_use_utf16() {
        match text_string("Ré") {
            Object::String(bytes, StringFormat::Hexadecimal) => {
                assert_eq!(bytes, vec![0xFE, 0xFF, 0x00, b'R', 0x00, 0xE9]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
