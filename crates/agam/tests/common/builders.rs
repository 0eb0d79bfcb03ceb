//! Builders for test payloads and requests.
//!
//! Every payload is a real, parseable file so the native engines can run on
//! it end to end.

#![allow(dead_code)]

use std::io::Cursor;

use agam::dispatch::{JobRequest, UploadedFile};
use image::{ImageFormat, Rgb, RgbImage};
use lopdf::{dictionary, Document, Object, Stream};

/// A PDF with one page per `(label, width, height)` entry. Each page shows
/// its label in Helvetica.
pub fn pdf_bytes(pages: &[(&str, f32, f32)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids = Vec::new();
    for (label, width, height) in pages {
        let content = format!("BT /F1 12 Tf 50 50 Td ({}) Tj ET", label);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(*width), Object::Real(*height)],
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to serialize PDF");
    bytes
}

/// `count` Letter-sized pages labelled `<prefix>1..=<prefix>count`.
pub fn letter_pdf(prefix: &str, count: usize) -> Vec<u8> {
    let labels: Vec<String> = (1..=count).map(|i| format!("{}{}", prefix, i)).collect();
    let pages: Vec<(&str, f32, f32)> = labels.iter().map(|l| (l.as_str(), 612.0, 792.0)).collect();
    pdf_bytes(&pages)
}

fn encode_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, format)
        .expect("Failed to encode image");
    cursor.into_inner()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_image(width, height, ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_image(width, height, ImageFormat::Jpeg)
}

/// A DOCX with one paragraph per entry.
pub fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join("fixture.docx");
    agam::engine::docx::write_pages_docx(&[paragraphs.join("\n")], &path)
        .expect("Failed to write DOCX");
    std::fs::read(&path).expect("Failed to read DOCX")
}

pub fn convert(filename: &str, bytes: Vec<u8>, operation: &str) -> JobRequest {
    JobRequest::Convert {
        files: vec![UploadedFile::new(filename, bytes)],
        operation: operation.to_string(),
    }
}

pub fn merge(files: Vec<(&str, Vec<u8>)>, output_filename: Option<&str>) -> JobRequest {
    JobRequest::Merge {
        files: files
            .into_iter()
            .map(|(name, bytes)| UploadedFile::new(name, bytes))
            .collect(),
        output_filename: output_filename.map(str::to_string),
    }
}

pub fn images(files: Vec<(&str, Vec<u8>)>, output_filename: Option<&str>) -> JobRequest {
    JobRequest::ImagesToPdf {
        files: files
            .into_iter()
            .map(|(name, bytes)| UploadedFile::new(name, bytes))
            .collect(),
        output_filename: output_filename.map(str::to_string),
    }
}
