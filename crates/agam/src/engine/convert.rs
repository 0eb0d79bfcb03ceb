use std::path::{Path, PathBuf};

use crate::engine::{docx, images, pdf, pptx, text, Engine};
use crate::error::ConvertError;
use crate::format::DocumentFormat;
use crate::sanitize::redact_path;
use crate::storage::{move_file, remove_quietly};

const DOCX_FALLBACK_FAILED: &str =
    "Failed to convert DOCX to PDF. Please ensure LibreOffice is installed correctly for full support.";

/// Single-input conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionOp {
    ConvertToPdf,
    PdfToDocx,
    PdfToTxt,
    PdfToPptx,
}

impl ConversionOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConvertToPdf => "convert_to_pdf",
            Self::PdfToDocx => "pdf_to_docx",
            Self::PdfToTxt => "pdf_to_txt",
            Self::PdfToPptx => "pdf_to_pptx",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "convert_to_pdf" => Some(Self::ConvertToPdf),
            "pdf_to_docx" => Some(Self::PdfToDocx),
            "pdf_to_txt" => Some(Self::PdfToTxt),
            "pdf_to_pptx" => Some(Self::PdfToPptx),
            _ => None,
        }
    }

    /// Format of the produced file.
    pub fn target(&self) -> DocumentFormat {
        match self {
            Self::ConvertToPdf => DocumentFormat::Pdf,
            Self::PdfToDocx => DocumentFormat::Docx,
            Self::PdfToTxt => DocumentFormat::Txt,
            Self::PdfToPptx => DocumentFormat::Pptx,
        }
    }

    /// Whether the operation only accepts PDF input.
    pub fn requires_pdf(&self) -> bool {
        !matches!(self, Self::ConvertToPdf)
    }

    fn target_label(&self) -> &'static str {
        match self {
            Self::ConvertToPdf => "PDF",
            Self::PdfToDocx => "DOCX",
            Self::PdfToTxt => "TXT",
            Self::PdfToPptx => "PPTX",
        }
    }
}

impl std::fmt::Display for ConversionOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Engine {
    /// Converts `input` and returns the path of the produced file in temp
    /// storage. Nothing is left at that path when the conversion fails.
    pub fn convert_file(&self, input: &Path, op: ConversionOp) -> Result<PathBuf, ConvertError> {
        let _span = tracing::info_span!(
            "engine.convert",
            operation = op.as_str(),
            input = %redact_path(input)
        )
        .entered();

        let ext = input
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let format =
            DocumentFormat::from_extension(&ext).ok_or(ConvertError::UnsupportedFormat(ext))?;
        if op.requires_pdf() && format != DocumentFormat::Pdf {
            return Err(ConvertError::InvalidInputType(op.target_label()));
        }

        let output = self.temp().allocate_file("converted", op.target().extension());
        let result = match op {
            ConversionOp::ConvertToPdf => self.to_pdf(input, format, &output),
            ConversionOp::PdfToTxt => pdf_to_txt(input, &output),
            ConversionOp::PdfToDocx => pdf_to_docx(input, &output),
            ConversionOp::PdfToPptx => self.pdf_to_pptx(input, &output),
        };

        match result {
            Ok(()) => {
                tracing::info!(output = %redact_path(&output), "Conversion finished");
                Ok(output)
            }
            Err(e) => {
                remove_quietly(&output);
                Err(e)
            }
        }
    }

    fn to_pdf(&self, input: &Path, format: DocumentFormat, output: &Path) -> Result<(), ConvertError> {
        match format {
            DocumentFormat::Pdf => {
                std::fs::copy(input, output).map_err(|e| ConvertError::WriteOutput {
                    path: output.to_path_buf(),
                    source: e,
                })?;
                Ok(())
            }
            DocumentFormat::Txt => text::txt_to_pdf(input, output),
            DocumentFormat::Png | DocumentFormat::Jpeg => images::images_to_pdf(&[input], output),
            DocumentFormat::Docx => match self.office_to_pdf(input, output) {
                Ok(()) => Ok(()),
                Err(e) => {
                    if self.office().is_some() {
                        tracing::warn!(error = %e, "Office conversion failed, using text rendering");
                    }
                    docx::docx_to_text_pdf(input, output).map_err(|fallback| {
                        ConvertError::ConversionFailure(format!(
                            "{} ({})",
                            DOCX_FALLBACK_FAILED, fallback
                        ))
                    })
                }
            },
            DocumentFormat::Pptx | DocumentFormat::Xlsx => self.office_to_pdf(input, output),
        }
    }

    fn office_to_pdf(&self, input: &Path, output: &Path) -> Result<(), ConvertError> {
        let Some(office) = self.office() else {
            let ext = input
                .extension()
                .map(|e| e.to_string_lossy().to_uppercase())
                .unwrap_or_default();
            return Err(ConvertError::ConversionFailure(format!(
                "Failed to convert {} to PDF. Please ensure LibreOffice is installed correctly and accessible in the system's PATH.",
                ext
            )));
        };

        let scratch = self.temp().allocate_dir("office")?;
        let result = office
            .convert_to_pdf(input, &scratch)
            .and_then(|produced| move_file(&produced, output).map_err(ConvertError::from));
        remove_quietly(&scratch);
        result
    }

    fn pdf_to_pptx(&self, input: &Path, output: &Path) -> Result<(), ConvertError> {
        let Some(rasterizer) = self.rasterizer() else {
            return Err(ConvertError::ConversionFailure(
                "Failed to convert PDF to PPTX. No PDF rasterizer (pdftoppm) is available.".to_string(),
            ));
        };

        let doc = pdf::load(input)?;
        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        let (width, height) = pdf::page_sizes(&doc).first().copied().unwrap_or(pdf::LETTER);
        let mut builder =
            pptx::PresentationBuilder::new(pptx::slide_extent(width), pptx::slide_extent(height));

        let scratch = self.temp().allocate_dir("raster")?;
        let rendered = (|| -> Result<(), ConvertError> {
            for page in pages {
                let png = rasterizer.render_page(input, page, &scratch)?;
                let bytes = std::fs::read(&png).map_err(|e| ConvertError::ReadDocument {
                    path: png.clone(),
                    source: e,
                })?;
                builder.add_picture_slide(bytes);
            }
            Ok(())
        })();
        remove_quietly(&scratch);
        rendered?;

        builder.write(output).map_err(ConvertError::ConversionFailure)
    }
}

fn pdf_to_txt(input: &Path, output: &Path) -> Result<(), ConvertError> {
    let doc = pdf::load(input)?;
    let pages = pdf::page_texts(&doc)?;
    std::fs::write(output, pages.join(text::PAGE_BREAK_MARKER)).map_err(|e| {
        ConvertError::WriteOutput {
            path: output.to_path_buf(),
            source: e,
        }
    })
}

fn pdf_to_docx(input: &Path, output: &Path) -> Result<(), ConvertError> {
    let doc = pdf::load(input)?;
    let pages = pdf::page_texts(&doc)?;
    docx::write_pages_docx(&pages, output)
}
