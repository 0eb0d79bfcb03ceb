//! Raster images to PDF pages.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageFormat};
use lopdf::{dictionary, Object, Stream};

use crate::engine::pdf::PdfBuilder;
use crate::error::ConvertError;
use crate::format::DocumentFormat;
use crate::sanitize::redact_path;

/// Resolution images are assumed to have when sized onto a page.
const IMAGE_DPI: f32 = 100.0;

fn image_error(path: &Path, e: image::ImageError) -> ConvertError {
    ConvertError::ConversionFailure(format!(
        "Failed to process image '{}': {}",
        redact_path(path),
        e
    ))
}

/// Page size in points for an image of the given pixel dimensions.
pub fn page_size_for(width_px: u32, height_px: u32) -> (f32, f32) {
    (
        width_px as f32 * 72.0 / IMAGE_DPI,
        height_px as f32 * 72.0 / IMAGE_DPI,
    )
}

fn add_image_page(builder: &mut PdfBuilder, path: &Path) -> Result<(), ConvertError> {
    let bytes = std::fs::read(path).map_err(|e| ConvertError::ReadDocument {
        path: path.to_path_buf(),
        source: e,
    })?;
    let img = image::load_from_memory(&bytes).map_err(|e| image_error(path, e))?;
    let (width, height) = img.dimensions();

    // Everything is normalised to RGB8 JPEG so alpha and palette images
    // embed the same way.
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .map_err(|e| image_error(path, e))?;

    let image_id = builder.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    ));

    let (page_width, page_height) = page_size_for(width, height);
    let content = format!("q {} 0 0 {} 0 0 cm /Im1 Do Q", page_width, page_height);
    builder.add_page(
        (page_width, page_height),
        dictionary! { "XObject" => dictionary! { "Im1" => Object::Reference(image_id) } },
        content.into_bytes(),
    );
    Ok(())
}

fn ensure_image(path: &Path) -> Result<(), ConvertError> {
    match DocumentFormat::from_path(path) {
        Some(format) if format.is_image() => Ok(()),
        _ => {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            Err(ConvertError::UnsupportedFormat(format!(
                "{}. Only PNG, JPG, and JPEG are supported",
                ext
            )))
        }
    }
}

/// Writes one page per image, in input order, to `output`.
pub fn images_to_pdf<P: AsRef<Path>>(inputs: &[P], output: &Path) -> Result<(), ConvertError> {
    let _span = tracing::info_span!("engine.images_to_pdf", images = inputs.len()).entered();

    if inputs.is_empty() {
        return Err(ConvertError::ConversionFailure(
            "At least one image is required".to_string(),
        ));
    }
    for input in inputs {
        ensure_image(input.as_ref())?;
    }

    let mut builder = PdfBuilder::new();
    for input in inputs {
        add_image_page(&mut builder, input.as_ref())?;
    }
    builder.save(output)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Writes a solid image; the format follows the file extension.
    pub fn write_image(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        img.save(path).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::testing::write_image;
    use super::*;
    use crate::engine::pdf;
    use tempfile::TempDir;

    #[test]
    fn test_page_size_for_uses_100_dpi() {
        assert_eq!(page_size_for(100, 200), (72.0, 144.0));
        assert_eq!(page_size_for(850, 1100), (612.0, 792.0));
    }

    #[test]
    fn test_one_page_per_image_in_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.jpg");
        write_image(&a, 100, 50);
        write_image(&b, 200, 100);
        let out = dir.path().join("combined.pdf");

        images_to_pdf(&[&a, &b], &out).unwrap();

        let doc = pdf::load(&out).unwrap();
        assert_eq!(pdf::page_sizes(&doc), vec![(72.0, 36.0), (144.0, 72.0)]);
    }

    #[test]
    fn test_rejects_non_image_input() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        write_image(&a, 10, 10);
        let gif = dir.path().join("b.gif");
        std::fs::write(&gif, b"GIF89a").unwrap();

        let err = images_to_pdf(&[&a, &gif], &dir.path().join("out.pdf")).unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedFormat(_)));
        assert!(err.to_string().contains("Only PNG, JPG, and JPEG are supported"));
        assert!(!dir.path().join("out.pdf").exists());
    }

    #[test]
    fn test_undecodable_image_fails() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not really a png").unwrap();

        let result = images_to_pdf(&[&bad], &dir.path().join("out.pdf"));
        assert!(matches!(result, Err(ConvertError::ConversionFailure(_))));
    }
}
