use std::path::{Path, PathBuf};

use crate::engine::{docx, images, pdf, pptx, Engine};
use crate::error::{ConvertError, MergeError};
use crate::format::DocumentFormat;
use crate::sanitize::{redact_path, sanitize_output_filename};
use crate::storage::remove_quietly;

pub const DEFAULT_MERGE_NAME: &str = "merged_document";
pub const DEFAULT_IMAGES_NAME: &str = "combined_images";

type MergeFn = fn(&[PathBuf], &Path) -> Result<(), MergeError>;

impl Engine {
    /// Merges same-type documents, in order, into one file in temp storage.
    pub fn merge_files(
        &self,
        inputs: &[PathBuf],
        file_type: DocumentFormat,
        output_filename: &str,
    ) -> Result<PathBuf, MergeError> {
        let _span = tracing::info_span!(
            "engine.merge",
            file_type = file_type.extension(),
            inputs = inputs.len()
        )
        .entered();

        if inputs.len() < 2 {
            return Err(MergeError::InsufficientInputs {
                count: inputs.len(),
            });
        }

        let merge: MergeFn = match file_type {
            DocumentFormat::Pdf => pdf::merge_pdfs::<PathBuf>,
            DocumentFormat::Docx => docx::merge_docx::<PathBuf>,
            DocumentFormat::Pptx => pptx::merge_pptx::<PathBuf>,
            other => return Err(MergeError::UnsupportedType(other.extension().to_string())),
        };

        for input in inputs {
            if !input.is_file() {
                return Err(MergeError::MissingInput(PathBuf::from(redact_path(input))));
            }
            if DocumentFormat::from_path(input) != Some(file_type) {
                return Err(MergeError::TypeMismatch {
                    path: PathBuf::from(redact_path(input)),
                    expected: file_type.extension().to_string(),
                });
            }
        }

        let name = sanitize_output_filename(
            Some(output_filename),
            DEFAULT_MERGE_NAME,
            file_type.extension(),
        );
        let output = self.temp().allocate_file(&name, file_type.extension());

        match merge(inputs, &output) {
            Ok(()) => {
                tracing::info!(output = %redact_path(&output), "Merge finished");
                Ok(output)
            }
            Err(e) => {
                remove_quietly(&output);
                Err(e)
            }
        }
    }

    /// Combines images, in order, into a single PDF in temp storage.
    pub fn combine_images(
        &self,
        inputs: &[PathBuf],
        output_filename: &str,
    ) -> Result<PathBuf, ConvertError> {
        let name = sanitize_output_filename(Some(output_filename), DEFAULT_IMAGES_NAME, "pdf");
        let output = self.temp().allocate_file(&name, "pdf");

        match images::images_to_pdf(inputs, &output) {
            Ok(()) => Ok(output),
            Err(e) => {
                remove_quietly(&output);
                Err(e)
            }
        }
    }
}
