use std::path::Path;

use serde::{Deserialize, Serialize};

/// File formats accepted as input or produced as output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Txt,
    Png,
    Jpeg,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "xlsx" => Some(Self::Xlsx),
            "txt" => Some(Self::Txt),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Xlsx => "xlsx",
            Self::Txt => "txt",
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    /// Formats that need the external office converter to become PDF.
    pub fn is_office(&self) -> bool {
        matches!(self, Self::Docx | Self::Pptx | Self::Xlsx)
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Png | Self::Jpeg)
    }

    pub fn is_mergeable(&self) -> bool {
        matches!(self, Self::Pdf | Self::Docx | Self::Pptx)
    }

    pub fn content_type(&self) -> String {
        mime_guess::from_ext(self.extension())
            .first_or_octet_stream()
            .to_string()
    }
}

/// Lowercased extension of a client-supplied file name, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_extension_is_case_insensitive() {
        assert_eq!(
            DocumentFormat::from_extension("PDF"),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::from_extension("Docx"),
            Some(DocumentFormat::Docx)
        );
    }

    #[test]
    fn test_jpg_and_jpeg_are_the_same_format() {
        assert_eq!(
            DocumentFormat::from_extension("jpg"),
            DocumentFormat::from_extension("jpeg")
        );
    }

    #[test]
    fn test_unknown_extension() {
        assert_eq!(DocumentFormat::from_extension("exe"), None);
        assert_eq!(DocumentFormat::from_extension(""), None);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("/tmp/report.XLSX")),
            Some(DocumentFormat::Xlsx)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("/tmp/noext")), None);
    }

    #[test]
    fn test_categories() {
        assert!(DocumentFormat::Pptx.is_office());
        assert!(!DocumentFormat::Txt.is_office());
        assert!(DocumentFormat::Jpeg.is_image());
        assert!(DocumentFormat::Docx.is_mergeable());
        assert!(!DocumentFormat::Xlsx.is_mergeable());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(DocumentFormat::Pdf.content_type(), "application/pdf");
        assert_eq!(DocumentFormat::Txt.content_type(), "text/plain");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("Report.DOCX").as_deref(), Some("docx"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("README"), None);
    }
}
