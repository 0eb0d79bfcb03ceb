//! Plain text layout onto Letter pages with the standard Helvetica font.

use std::path::Path;

use lopdf::{dictionary, Object};

use crate::engine::pdf::{PdfBuilder, LETTER};
use crate::error::ConvertError;

const FONT_SIZE: u32 = 12;
const LEFT_MARGIN: i32 = 50;
const TOP_BASELINE: i32 = 750;
const BOTTOM_LIMIT: i32 = 50;
const LINE_HEIGHT: i32 = 14;

/// Separator written between pages when extracting text from a PDF.
pub const PAGE_BREAK_MARKER: &str = "\n\n--- Page Break ---\n\n";

/// Encodes a line as a PDF literal string in WinAnsi, replacing characters
/// outside Latin-1 with `?`.
fn pdf_literal(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 2);
    out.push('(');
    for ch in line.chars() {
        let code = ch as u32;
        match ch {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ if code < 0x20 => {}
            _ if code < 0x7f => out.push(ch),
            _ if (0xa0..=0xff).contains(&code) => out.push_str(&format!("\\{:03o}", code)),
            _ => out.push('?'),
        }
    }
    out.push(')');
    out
}

/// Splits lines onto pages: a line drawn below the bottom margin starts a
/// new page instead.
fn paginate<S: AsRef<str>>(lines: &[S]) -> Vec<Vec<(i32, String)>> {
    let mut pages = vec![Vec::new()];
    let mut y = TOP_BASELINE;
    for line in lines {
        if y < BOTTOM_LIMIT {
            pages.push(Vec::new());
            y = TOP_BASELINE;
        }
        if let Some(page) = pages.last_mut() {
            page.push((y, line.as_ref().trim().to_string()));
        }
        y -= LINE_HEIGHT;
    }
    pages
}

/// Lays `lines` out and writes the PDF to `output`. No lines still
/// produce a single blank page.
pub fn write_lines_pdf<S: AsRef<str>>(lines: &[S], output: &Path) -> Result<(), ConvertError> {
    let mut builder = PdfBuilder::new();
    let font_id = builder.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    for page in paginate(lines) {
        let mut content = String::new();
        for (y, text) in page {
            if text.is_empty() {
                continue;
            }
            content.push_str(&format!(
                "BT /F1 {} Tf {} {} Td {} Tj ET\n",
                FONT_SIZE,
                LEFT_MARGIN,
                y,
                pdf_literal(&text)
            ));
        }
        builder.add_page(
            LETTER,
            dictionary! { "Font" => dictionary! { "F1" => Object::Reference(font_id) } },
            content.into_bytes(),
        );
    }

    builder.save(output)
}

/// Renders a UTF-8 (lossily decoded) text file as PDF.
pub fn txt_to_pdf(input: &Path, output: &Path) -> Result<(), ConvertError> {
    let _span = tracing::info_span!("engine.txt_to_pdf").entered();

    let bytes = std::fs::read(input).map_err(|e| ConvertError::ReadDocument {
        path: input.to_path_buf(),
        source: e,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    write_lines_pdf(&lines, output)
}
