//! Request validation shared by durable and streaming modes.
//!
//! Everything here is pure: a rejected request has touched neither the job
//! store nor any storage.

use crate::config::LimitsConfig;
use crate::engine::{ConversionOp, DEFAULT_IMAGES_NAME, DEFAULT_MERGE_NAME};
use crate::error::ValidationError;
use crate::format::{extension_of, DocumentFormat};
use crate::jobs::Operation;
use crate::sanitize::sanitize_output_filename;

pub const MIN_MERGE_FILES: usize = 2;

/// One file as received from the client.
#[derive(Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn format(&self) -> Option<DocumentFormat> {
        extension_of(&self.filename).and_then(|ext| DocumentFormat::from_extension(&ext))
    }
}

impl std::fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedFile")
            .field("filename", &self.filename)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// A request as the transport hands it over.
#[derive(Debug, Clone)]
pub enum JobRequest {
    /// Exactly one file is accepted.
    Convert {
        files: Vec<UploadedFile>,
        operation: String,
    },
    Merge {
        files: Vec<UploadedFile>,
        output_filename: Option<String>,
    },
    ImagesToPdf {
        files: Vec<UploadedFile>,
        output_filename: Option<String>,
    },
}

/// A request that passed every check. `file_type` is the source format for
/// conversions and the output format for merges.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub operation: Operation,
    pub file_type: DocumentFormat,
    pub output_filename: Option<String>,
    pub files: Vec<UploadedFile>,
}

pub fn validate(
    request: JobRequest,
    limits: &LimitsConfig,
) -> Result<ValidatedRequest, ValidationError> {
    match request {
        JobRequest::Convert { files, operation } => {
            let op = ConversionOp::parse(operation.trim())
                .ok_or(ValidationError::UnknownOperation(operation))?;
            check_count(files.len(), 1, 1)?;
            let file_type = check_files(&files, limits, |_| true)?;

            Ok(ValidatedRequest {
                operation: Operation::Convert(op),
                file_type,
                output_filename: None,
                files,
            })
        }
        JobRequest::Merge {
            files,
            output_filename,
        } => {
            check_count(files.len(), MIN_MERGE_FILES, limits.max_merge_files)?;
            let file_type = check_files(&files, limits, DocumentFormat::is_mergeable)?;
            let name = sanitize_output_filename(
                output_filename.as_deref(),
                DEFAULT_MERGE_NAME,
                file_type.extension(),
            );

            Ok(ValidatedRequest {
                operation: Operation::Merge,
                file_type,
                output_filename: Some(name),
                files,
            })
        }
        JobRequest::ImagesToPdf {
            files,
            output_filename,
        } => {
            check_count(files.len(), 1, limits.max_merge_files)?;
            check_files(&files, limits, DocumentFormat::is_image)?;
            let name =
                sanitize_output_filename(output_filename.as_deref(), DEFAULT_IMAGES_NAME, "pdf");

            Ok(ValidatedRequest {
                operation: Operation::ImagesToPdf,
                file_type: DocumentFormat::Pdf,
                output_filename: Some(name),
                files,
            })
        }
    }
}

fn check_count(got: usize, min: usize, max: usize) -> Result<(), ValidationError> {
    if got == 0 {
        return Err(ValidationError::NoFiles);
    }
    if got < min {
        return Err(ValidationError::TooFewFiles { min, got });
    }
    if got > max {
        return Err(ValidationError::TooManyFiles { max, got });
    }
    Ok(())
}

/// Per-file checks, then the total size, then the same-type rule. Returns
/// the format of the first file.
fn check_files(
    files: &[UploadedFile],
    limits: &LimitsConfig,
    accepted: impl Fn(&DocumentFormat) -> bool,
) -> Result<DocumentFormat, ValidationError> {
    let mut formats = Vec::with_capacity(files.len());
    let mut total: u64 = 0;

    for file in files {
        if file.bytes.is_empty() {
            return Err(ValidationError::EmptyFile {
                filename: file.filename.clone(),
            });
        }
        if file.size() > limits.max_file_size {
            return Err(ValidationError::FileTooLarge {
                filename: file.filename.clone(),
                max: limits.max_file_size,
            });
        }
        let format = file
            .format()
            .filter(|f| accepted(f))
            .ok_or_else(|| ValidationError::UnsupportedType {
                filename: file.filename.clone(),
            })?;
        formats.push(format);
        total += file.size();
    }

    if total > limits.max_total_size {
        return Err(ValidationError::TotalTooLarge {
            total,
            max: limits.max_total_size,
        });
    }

    let first = *formats.first().ok_or(ValidationError::NoFiles)?;
    // Images may mix PNG and JPEG; merges may not mix anything.
    let mixed = formats
        .iter()
        .any(|f| *f != first && !(f.is_image() && first.is_image()));
    if mixed {
        return Err(ValidationError::MixedTypes);
    }

    Ok(first)
}
