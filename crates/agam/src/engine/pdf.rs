//! PDF reading, writing and merging on top of lopdf.

use std::collections::BTreeMap;
use std::path::Path;

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};

use crate::error::{ConvertError, MergeError};

/// US Letter in points.
pub const LETTER: (f32, f32) = (612.0, 792.0);

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: &[&[u8]] = &[b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

fn pdf_failure(context: &str, e: lopdf::Error) -> ConvertError {
    ConvertError::ConversionFailure(format!("{}: {}", context, e))
}

/// Incrementally assembles a single-tree PDF document.
pub(crate) struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn add_object<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        self.doc.add_object(object)
    }

    pub fn add_page(
        &mut self,
        (width, height): (f32, f32),
        resources: Dictionary,
        content: Vec<u8>,
    ) -> ObjectId {
        let content_id = self
            .doc
            .add_object(lopdf::Stream::new(dictionary! {}, content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(width), Object::Real(height)],
            "Resources" => resources,
            "Contents" => content_id,
        });
        self.kids.push(page_id);
        page_id
    }

    pub fn save(mut self, path: &Path) -> Result<(), ConvertError> {
        let count = self.kids.len() as i64;
        let kids: Vec<Object> = self.kids.into_iter().map(Object::from).collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        self.doc.save(path).map_err(|e| {
            ConvertError::ConversionFailure(format!("Failed to write PDF: {}", e))
        })?;
        Ok(())
    }
}

pub fn load(path: &Path) -> Result<Document, ConvertError> {
    Document::load(path).map_err(|e| pdf_failure("Failed to load PDF", e))
}

/// Extracted text of every page, in page order.
///
/// A page whose text cannot be extracted fails the whole call.
pub fn page_texts(doc: &Document) -> Result<Vec<String>, ConvertError> {
    doc.get_pages()
        .keys()
        .map(|page_num| {
            doc.extract_text(&[*page_num])
                .map_err(|e| pdf_failure(&format!("Failed to extract text from page {}", page_num), e))
        })
        .collect()
}

fn type_name(object: &Object) -> Option<&[u8]> {
    object
        .as_dict()
        .ok()
        .and_then(|d| d.get(b"Type").ok())
        .and_then(|t| t.as_name().ok())
}

/// Looks `key` up on a page, walking up the `Parent` chain.
fn inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut current = page.clone();
    // Bounded walk; malformed files can contain Parent cycles.
    for _ in 0..64 {
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
        let parent_id = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_dictionary(parent_id).ok()?.clone();
    }
    None
}

/// Width and height of a page's MediaBox in points. Falls back to Letter
/// when the box is missing or malformed.
pub fn page_size(doc: &Document, page_id: ObjectId) -> (f32, f32) {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return LETTER;
    };
    let Some(media_box) = inherited(doc, page, b"MediaBox") else {
        return LETTER;
    };
    let media_box = match media_box {
        Object::Reference(id) => match doc.get_object(id) {
            Ok(obj) => obj.clone(),
            Err(_) => return LETTER,
        },
        other => other,
    };

    let values: Vec<f32> = media_box
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_float().ok()).collect())
        .unwrap_or_default();
    match values.as_slice() {
        [x0, y0, x1, y1] if (x1 - x0).abs() > 0.0 && (y1 - y0).abs() > 0.0 => {
            ((x1 - x0).abs(), (y1 - y0).abs())
        }
        _ => LETTER,
    }
}

/// Sizes of all pages in page order.
pub fn page_sizes(doc: &Document) -> Vec<(f32, f32)> {
    doc.get_pages()
        .values()
        .map(|id| page_size(doc, *id))
        .collect()
}

/// Concatenates the pages of `inputs`, in order, into `output`.
pub fn merge_pdfs<P: AsRef<Path>>(inputs: &[P], output: &Path) -> Result<(), MergeError> {
    let _span = tracing::info_span!("engine.merge_pdf", inputs = inputs.len()).entered();

    let mut max_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for input in inputs {
        let input = input.as_ref();
        let mut doc = Document::load(input).map_err(|e| {
            MergeError::MergeFailure(format!(
                "Failed to load PDF '{}': {}",
                crate::sanitize::redact_path(input),
                e
            ))
        })?;
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for page_id in doc.get_pages().into_values() {
            let mut page = doc
                .get_dictionary(page_id)
                .map_err(|e| MergeError::MergeFailure(format!("Broken page object: {}", e)))?
                .clone();
            for key in INHERITABLE {
                if !page.has(key) {
                    if let Some(value) = inherited(&doc, &page, key) {
                        page.set(key.to_vec(), value);
                    }
                }
            }
            pages.push((page_id, page));
        }

        objects.extend(doc.objects);
    }

    let mut merged = Document::with_version("1.5");
    merged.max_id = max_id;
    for (id, object) in objects {
        match type_name(&object) {
            Some(b"Catalog") | Some(b"Pages") | Some(b"Page") | Some(b"Outlines")
            | Some(b"Outline") => {}
            _ => {
                merged.objects.insert(id, object);
            }
        }
    }

    let pages_id = merged.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());
    for (page_id, mut page) in pages {
        page.set("Parent", pages_id);
        merged.objects.insert(page_id, Object::Dictionary(page));
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    merged.save(output).map_err(|e| {
        MergeError::MergeFailure(format!("Failed to write merged PDF: {}", e))
    })?;

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::write_pdf;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_writes_loadable_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.pdf");
        write_pdf(&path, &[("one", 612.0, 792.0), ("two", 300.0, 400.0)]);

        let doc = load(&path).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
        assert_eq!(page_sizes(&doc), vec![(612.0, 792.0), (300.0, 400.0)]);
    }

    #[test]
    fn test_page_texts_one_entry_per_page() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.pdf");
        write_pdf(&path, &[("alpha", 612.0, 792.0), ("beta", 612.0, 792.0)]);

        let doc = load(&path).unwrap();
        assert_eq!(page_texts(&doc).unwrap().len(), 2);
    }

    #[test]
    fn test_page_size_inherited_from_tree() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 200.into(), 100.into()],
            }),
        );

        assert_eq!(page_size(&doc, page_id), (200.0, 100.0));
    }

    #[test]
    fn test_merge_preserves_input_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        write_pdf(&a, &[("a1", 100.0, 100.0), ("a2", 200.0, 100.0)]);
        write_pdf(&b, &[("b1", 300.0, 100.0)]);
        let out = dir.path().join("merged.pdf");

        merge_pdfs(&[&b, &a], &out).unwrap();

        let merged = load(&out).unwrap();
        let widths: Vec<f32> = page_sizes(&merged).into_iter().map(|(w, _)| w).collect();
        assert_eq!(widths, vec![300.0, 100.0, 200.0]);
    }

    #[test]
    fn test_merge_rejects_corrupt_input() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        write_pdf(&good, &[("ok", 612.0, 792.0)]);
        std::fs::write(&bad, b"not a pdf").unwrap();

        let result = merge_pdfs(&[&good, &bad], &dir.path().join("out.pdf"));
        assert!(matches!(result, Err(MergeError::MergeFailure(_))));
    }
}
