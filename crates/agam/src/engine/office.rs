//! Headless office suite (LibreOffice) used for docx/pptx/xlsx → PDF.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::engine::subprocess::{file_url, find_on_path, program_name, resolve_binary, run_with_timeout};
use crate::error::{ConfigError, ConvertError};

/// Install locations probed after `PATH` when no binary is configured.
pub const WELL_KNOWN_OFFICE_PATHS: &[&str] = &[
    r"C:\Program Files\LibreOffice\program\soffice.exe",
    r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
    "/usr/bin/soffice",
    "/usr/local/bin/soffice",
    "/opt/libreoffice/program/soffice",
    "/Applications/LibreOffice.app/Contents/MacOS/soffice",
];

/// Resolves the office binary once at startup.
///
/// An explicitly configured binary that cannot be found is a configuration
/// error. Without one, `PATH` and the well-known locations are probed and a
/// miss simply means office conversions will use their fallbacks.
pub fn locate_office(configured: Option<&str>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(configured) = configured {
        return resolve_binary(configured)
            .map(Some)
            .ok_or_else(|| ConfigError::BinaryNotFound {
                role: "office",
                path: PathBuf::from(configured),
            });
    }

    let found = ["soffice", "libreoffice"]
        .iter()
        .find_map(|name| find_on_path(name))
        .or_else(|| {
            WELL_KNOWN_OFFICE_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file())
        });

    match &found {
        Some(path) => tracing::info!(path = %path.display(), "Found office converter"),
        None => tracing::warn!(
            "No office converter found; docx falls back to text rendering, pptx/xlsx conversion is unavailable"
        ),
    }

    Ok(found)
}

#[derive(Debug, Clone)]
pub struct OfficeConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl OfficeConverter {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Converts `input` to PDF inside `scratch`, returning the produced file.
    ///
    /// Each call gets its own user profile under `scratch`; two instances
    /// sharing a profile would block each other.
    pub fn convert_to_pdf(&self, input: &Path, scratch: &Path) -> Result<PathBuf, ConvertError> {
        let _span = tracing::info_span!("engine.office").entered();

        let mut command = Command::new(&self.binary);
        command
            .arg(format!(
                "-env:UserInstallation={}",
                file_url(&scratch.join("profile"))
            ))
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(scratch)
            .arg(input);

        let output = run_with_timeout(command, self.timeout)?;
        if !output.status.success() {
            return Err(ConvertError::ConversionFailure(format!(
                "{} exited with {}: {}",
                program_name(&self.binary),
                output.status,
                output.diagnostics()
            )));
        }

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let produced = scratch.join(format!("{}.pdf", stem));
        if !produced.is_file() {
            return Err(ConvertError::ConversionFailure(format!(
                "{} reported success but produced no PDF: {}",
                program_name(&self.binary),
                output.diagnostics()
            )));
        }

        Ok(produced)
    }
}
