//! Zip-based OOXML package plumbing shared by the DOCX and PPTX writers.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::sanitize::redact_path;

pub(crate) type PackageResult<T> = std::result::Result<T, String>;

pub(crate) fn open(path: &Path) -> PackageResult<ZipArchive<File>> {
    let file = File::open(path)
        .map_err(|e| format!("Failed to open '{}': {}", redact_path(path), e))?;
    ZipArchive::new(file)
        .map_err(|e| format!("'{}' is not a valid package: {}", redact_path(path), e))
}

pub(crate) fn read_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> PackageResult<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| format!("Missing part '{}': {}", name, e))?;
    let mut buffer = Vec::new();
    entry
        .read_to_end(&mut buffer)
        .map_err(|e| format!("Failed to read part '{}': {}", name, e))?;
    Ok(buffer)
}

pub(crate) fn read_string<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> PackageResult<String> {
    let bytes = read_bytes(archive, name)?;
    String::from_utf8(bytes).map_err(|e| format!("Part '{}' is not UTF-8: {}", name, e))
}

pub(crate) fn has_part<R: Read + Seek>(archive: &ZipArchive<R>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

/// Writes parts into a new package file.
pub(crate) struct PackageWriter {
    zip: ZipWriter<File>,
    options: SimpleFileOptions,
}

impl PackageWriter {
    pub fn create(path: &Path) -> PackageResult<Self> {
        let file = File::create(path)
            .map_err(|e| format!("Failed to create '{}': {}", redact_path(path), e))?;
        Ok(Self {
            zip: ZipWriter::new(file),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        })
    }

    pub fn add(&mut self, name: &str, bytes: &[u8]) -> PackageResult<()> {
        self.zip
            .start_file(name, self.options)
            .map_err(|e| format!("Failed to add part '{}': {}", name, e))?;
        self.zip
            .write_all(bytes)
            .map_err(|e| format!("Failed to write part '{}': {}", name, e))
    }

    pub fn finish(self) -> PackageResult<()> {
        self.zip
            .finish()
            .map(|_| ())
            .map_err(|e| format!("Failed to finalize package: {}", e))
    }
}

/// Resolves a relationship target relative to the part that owns it.
///
/// `word/document.xml` + `media/a.png` → `word/media/a.png`.
pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = source_part.split('/').collect();
    segments.pop();
    for segment in target.split('/') {
        match segment {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Relationships part for a given part: `ppt/slides/slide1.xml` →
/// `ppt/slides/_rels/slide1.xml.rels`.
pub(crate) fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_parts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg.zip");
        let mut writer = PackageWriter::create(&path).unwrap();
        writer.add("a/b.xml", b"<x/>").unwrap();
        writer.finish().unwrap();

        let mut archive = open(&path).unwrap();
        assert!(has_part(&archive, "a/b.xml"));
        assert_eq!(read_string(&mut archive, "a/b.xml").unwrap(), "<x/>");
        assert!(read_bytes(&mut archive, "missing.xml").is_err());
    }

    #[test]
    fn test_open_rejects_non_zip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, b"plain text").unwrap();
        assert!(open(&path).is_err());
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("word/document.xml", "media/a.png"), "word/media/a.png");
        assert_eq!(
            resolve_target("ppt/slides/slide1.xml", "../media/image1.png"),
            "ppt/media/image1.png"
        );
        assert_eq!(resolve_target("ppt/slides/slide1.xml", "/ppt/x.xml"), "ppt/x.xml");
    }

    #[test]
    fn test_rels_path() {
        assert_eq!(rels_path("ppt/slides/slide1.xml"), "ppt/slides/_rels/slide1.xml.rels");
        assert_eq!(rels_path("x.xml"), "_rels/x.xml.rels");
    }
}
