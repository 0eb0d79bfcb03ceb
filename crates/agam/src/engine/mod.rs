pub mod convert;
pub mod docx;
pub mod images;
pub mod merge;
pub mod office;
mod package;
pub mod pdf;
pub mod pptx;
pub mod raster;
pub mod subprocess;
pub mod text;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::error::{ConfigError, ConvertError, MergeError};
use crate::format::DocumentFormat;
use crate::storage::TempStorage;

pub use convert::ConversionOp;
pub use merge::{DEFAULT_IMAGES_NAME, DEFAULT_MERGE_NAME};
pub use office::{locate_office, OfficeConverter};
pub use raster::{locate_rasterizer, Rasterizer};

/// The document operations a job can run.
///
/// Every method returns a path in temp storage that the caller owns and must
/// remove once the result has been persisted or streamed.
pub trait DocumentEngine: Send + Sync {
    fn convert(&self, input: &Path, op: ConversionOp) -> Result<PathBuf, ConvertError>;

    fn merge(
        &self,
        inputs: &[PathBuf],
        file_type: DocumentFormat,
        output_filename: &str,
    ) -> Result<PathBuf, MergeError>;

    fn images_to_pdf(&self, inputs: &[PathBuf], output_filename: &str)
        -> Result<PathBuf, ConvertError>;

    fn temp(&self) -> &TempStorage;
}

/// Native engine backed by lopdf/zip/quick-xml plus optional external tools.
pub struct Engine {
    temp: TempStorage,
    office: Option<OfficeConverter>,
    rasterizer: Option<Rasterizer>,
}

impl Engine {
    pub fn new(
        temp: TempStorage,
        office: Option<OfficeConverter>,
        rasterizer: Option<Rasterizer>,
    ) -> Self {
        Self {
            temp,
            office,
            rasterizer,
        }
    }

    /// Resolves the external tools named in `config` once. Fails only when an
    /// explicitly configured binary does not exist.
    pub fn from_config(config: &Config, temp: TempStorage) -> Result<Self, ConfigError> {
        let timeout = Duration::from_secs(config.converter.timeout_secs);
        let office = locate_office(config.converter.office_binary.as_deref())?
            .map(|binary| OfficeConverter::new(binary, timeout));
        let rasterizer = locate_rasterizer(&config.converter.rasterizer_binary)?
            .map(|binary| Rasterizer::new(binary, timeout));
        Ok(Self::new(temp, office, rasterizer))
    }

    pub fn temp(&self) -> &TempStorage {
        &self.temp
    }

    pub fn office(&self) -> Option<&OfficeConverter> {
        self.office.as_ref()
    }

    pub fn rasterizer(&self) -> Option<&Rasterizer> {
        self.rasterizer.as_ref()
    }
}

impl DocumentEngine for Engine {
    fn convert(&self, input: &Path, op: ConversionOp) -> Result<PathBuf, ConvertError> {
        self.convert_file(input, op)
    }

    fn merge(
        &self,
        inputs: &[PathBuf],
        file_type: DocumentFormat,
        output_filename: &str,
    ) -> Result<PathBuf, MergeError> {
        self.merge_files(inputs, file_type, output_filename)
    }

    fn images_to_pdf(
        &self,
        inputs: &[PathBuf],
        output_filename: &str,
    ) -> Result<PathBuf, ConvertError> {
        self.combine_images(inputs, output_filename)
    }

    fn temp(&self) -> &TempStorage {
        &self.temp
    }
}
