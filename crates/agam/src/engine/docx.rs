//! WordprocessingML: text extraction, a minimal writer, and body-level merging.

use std::io::Read;
use std::path::Path;

use quick_xml::escape::{escape, resolve_predefined_entity};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::engine::package::{self, PackageResult, PackageWriter};
use crate::engine::text;
use crate::error::{ConvertError, MergeError};

const DOCUMENT_PART: &str = "word/document.xml";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const PAGE_BREAK: &str = r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#;

const LETTER_SECTION: &str = r#"<w:sectPr><w:pgSz w:w="12240" w:h="15840"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="720" w:footer="720" w:gutter="0"/></w:sectPr>"#;

fn is_page_break(e: &BytesStart<'_>) -> bool {
    e.attributes()
        .flatten()
        .any(|a| a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page")
}

/// Paragraph texts of a `word/document.xml` body.
fn parse_paragraphs(xml: &str) -> PackageResult<Vec<String>> {
    let mut reader = Reader::from_str(xml);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_element = false;
    let mut in_paragraph = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = true,
                b"p" => in_paragraph = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" if in_paragraph => current.push('\t'),
                b"br" | b"cr" if in_paragraph && !is_page_break(e) => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" if in_paragraph => {
                    paragraphs.extend(current.split('\n').map(str::to_string));
                    current.clear();
                    in_paragraph = false;
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_text_element => {
                let decoded = e.decode().unwrap_or_default();
                current.push_str(&decoded);
            }
            Ok(Event::GeneralRef(e)) if in_text_element => {
                if let Ok(Some(ch)) = e.resolve_char_ref() {
                    current.push(ch);
                } else if let Ok(name) = e.decode() {
                    if let Some(value) = resolve_predefined_entity(&name) {
                        current.push_str(value);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parsing error: {}", e)),
            _ => {}
        }
    }

    Ok(paragraphs)
}

/// Paragraph texts of a DOCX file.
pub fn extract_paragraphs(path: &Path) -> PackageResult<Vec<String>> {
    let mut archive = package::open(path)?;
    let xml = package::read_string(&mut archive, DOCUMENT_PART)?;
    parse_paragraphs(&xml)
}

/// Text-only rendering used when no office converter is available.
pub fn docx_to_text_pdf(input: &Path, output: &Path) -> Result<(), ConvertError> {
    let _span = tracing::info_span!("engine.docx_text_fallback").entered();
    let paragraphs = extract_paragraphs(input).map_err(ConvertError::ConversionFailure)?;
    text::write_lines_pdf(&paragraphs, output)
}

/// Drops characters XML 1.0 cannot carry.
fn xml_safe(s: &str) -> String {
    s.chars()
        .filter(|c| *c == '\t' || *c >= ' ')
        .collect()
}

fn paragraph(line: &str) -> String {
    let line = xml_safe(line);
    if line.is_empty() {
        return "<w:p/>".to_string();
    }
    format!(
        r#"<w:p><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        escape(line.as_str())
    )
}

/// Writes a DOCX with one paragraph per line of each page and a page break
/// between pages.
pub fn write_pages_docx<S: AsRef<str>>(pages: &[S], output: &Path) -> Result<(), ConvertError> {
    let mut body = String::new();
    for (index, page) in pages.iter().enumerate() {
        if index > 0 {
            body.push_str(PAGE_BREAK);
        }
        for line in page.as_ref().lines() {
            body.push_str(&paragraph(line));
        }
    }

    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}{}</w:body></w:document>"#,
        body, LETTER_SECTION
    );

    let write = || -> PackageResult<()> {
        let mut writer = PackageWriter::create(output)?;
        writer.add("[Content_Types].xml", CONTENT_TYPES.as_bytes())?;
        writer.add("_rels/.rels", PACKAGE_RELS.as_bytes())?;
        writer.add(DOCUMENT_PART, document.as_bytes())?;
        writer.finish()
    };
    write().map_err(ConvertError::ConversionFailure)
}

/// Byte offsets into a `document.xml` that merging needs.
#[derive(Debug, PartialEq, Eq)]
struct BodyLayout {
    /// Span of the root start tag.
    root_tag: (usize, usize),
    /// First byte after `<w:body>`.
    content_start: usize,
    /// Start of the trailing `w:sectPr`, if the body ends with one.
    section_start: Option<usize>,
    /// First byte of `</w:body>`.
    content_end: usize,
}

impl BodyLayout {
    /// Where foreign content goes: before the trailing section properties.
    fn insert_at(&self) -> usize {
        self.section_start.unwrap_or(self.content_end)
    }
}

fn body_layout(xml: &str) -> PackageResult<BodyLayout> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut root_tag = None;
    let mut content_start = None;
    let mut section_start = None;
    let mut content_end = None;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| format!("XML parsing error: {}", e))?;
        let after = reader.buffer_position() as usize;
        match event {
            Event::Start(e) => {
                depth += 1;
                if depth == 1 {
                    root_tag = Some((before, after));
                } else if depth == 2 && e.local_name().as_ref() == b"body" {
                    content_start = Some(after);
                } else if depth == 3 && content_start.is_some() && content_end.is_none() {
                    section_start = (e.local_name().as_ref() == b"sectPr").then_some(before);
                }
            }
            Event::Empty(e) if depth == 2 && content_start.is_some() && content_end.is_none() => {
                section_start = (e.local_name().as_ref() == b"sectPr").then_some(before);
            }
            Event::End(e) => {
                if depth == 2 && e.local_name().as_ref() == b"body" {
                    content_end = Some(before);
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (root_tag, content_start, content_end) {
        (Some(root_tag), Some(content_start), Some(content_end)) => Ok(BodyLayout {
            root_tag,
            content_start,
            section_start,
            content_end,
        }),
        _ => Err("document.xml has no w:body".to_string()),
    }
}

/// `xmlns:*` declarations of a root start tag, as `(name, raw value)`.
fn namespace_declarations(root_tag: &str) -> PackageResult<Vec<(String, String)>> {
    let mut reader = Reader::from_str(root_tag);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(e
                    .attributes()
                    .flatten()
                    .filter_map(|attr| {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                        key.starts_with("xmlns:").then(|| {
                            (key, String::from_utf8_lossy(&attr.value).to_string())
                        })
                    })
                    .collect());
            }
            Ok(Event::Eof) => return Ok(Vec::new()),
            Err(e) => return Err(format!("XML parsing error: {}", e)),
            _ => {}
        }
    }
}

/// Appends the bodies of `others` to `base`, each after a page break.
fn merge_document_xml(base: &str, others: &[String]) -> PackageResult<String> {
    let layout = body_layout(base)?;
    let base_root = &base[layout.root_tag.0..layout.root_tag.1];
    let mut declared: Vec<String> = namespace_declarations(base_root)?
        .into_iter()
        .map(|(k, _)| k)
        .collect();

    let mut extra_namespaces = String::new();
    let mut appended = String::new();
    for other in others {
        let other_layout = body_layout(other)?;
        let other_root = &other[other_layout.root_tag.0..other_layout.root_tag.1];
        for (key, value) in namespace_declarations(other_root)? {
            if !declared.contains(&key) {
                extra_namespaces.push_str(&format!(" {}=\"{}\"", key, value));
                declared.push(key);
            }
        }
        appended.push_str(PAGE_BREAK);
        appended.push_str(&other[other_layout.content_start..other_layout.insert_at()]);
    }

    // Declarations go right before the `>` closing the root start tag.
    let root_close = layout.root_tag.1 - 1;
    let insert_at = layout.insert_at();
    let mut merged = String::with_capacity(base.len() + appended.len() + extra_namespaces.len());
    merged.push_str(&base[..root_close]);
    merged.push_str(&extra_namespaces);
    merged.push_str(&base[root_close..insert_at]);
    merged.push_str(&appended);
    merged.push_str(&base[insert_at..]);
    Ok(merged)
}

/// Merges DOCX files body by body into a copy of the first package.
pub fn merge_docx<P: AsRef<Path>>(inputs: &[P], output: &Path) -> Result<(), MergeError> {
    let _span = tracing::info_span!("engine.merge_docx", inputs = inputs.len()).entered();

    let run = || -> PackageResult<()> {
        let (first, rest) = inputs
            .split_first()
            .ok_or_else(|| "No documents to merge".to_string())?;

        let mut bodies = Vec::with_capacity(rest.len());
        for input in rest {
            let mut archive = package::open(input.as_ref())?;
            bodies.push(package::read_string(&mut archive, DOCUMENT_PART)?);
        }

        let mut base = package::open(first.as_ref())?;
        let base_document = package::read_string(&mut base, DOCUMENT_PART)?;
        let merged = merge_document_xml(&base_document, &bodies)?;

        let mut writer = PackageWriter::create(output)?;
        for index in 0..base.len() {
            let mut entry = base
                .by_index(index)
                .map_err(|e| format!("Failed to read package entry: {}", e))?;
            if entry.is_dir() || entry.name() == DOCUMENT_PART {
                continue;
            }
            let name = entry.name().to_string();
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| format!("Failed to read part '{}': {}", name, e))?;
            writer.add(&name, &bytes)?;
        }
        writer.add(DOCUMENT_PART, merged.as_bytes())?;
        writer.finish()
    };

    run().map_err(MergeError::MergeFailure)
}
