//! PDF page rasterization through an external `pdftoppm`-compatible tool.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::engine::subprocess::{program_name, resolve_binary, run_with_timeout};
use crate::error::{ConfigError, ConvertError};

/// Resolution pages are rendered at for slide images.
pub const RASTER_DPI: u32 = 150;

/// Resolves the rasterizer binary. An explicit path that does not exist is a
/// configuration error; a bare name missing from `PATH` only disables PPTX
/// export.
pub fn locate_rasterizer(configured: &str) -> Result<Option<PathBuf>, ConfigError> {
    let is_path = Path::new(configured).components().count() > 1;
    match resolve_binary(configured) {
        Some(path) => {
            tracing::info!(path = %path.display(), "Found rasterizer");
            Ok(Some(path))
        }
        None if is_path => Err(ConfigError::BinaryNotFound {
            role: "rasterizer",
            path: PathBuf::from(configured),
        }),
        None => {
            tracing::warn!(binary = configured, "Rasterizer not found; PDF to PPTX is unavailable");
            Ok(None)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rasterizer {
    binary: PathBuf,
    timeout: Duration,
}

impl Rasterizer {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    /// Renders 1-based page `page` of `pdf` to a PNG inside `scratch`.
    pub fn render_page(&self, pdf: &Path, page: u32, scratch: &Path) -> Result<PathBuf, ConvertError> {
        let prefix = scratch.join(format!("page-{}", page));
        let mut command = Command::new(&self.binary);
        command
            .args(["-png", "-r"])
            .arg(RASTER_DPI.to_string())
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-singlefile")
            .arg(pdf)
            .arg(&prefix);

        let output = run_with_timeout(command, self.timeout)?;
        let produced = prefix.with_extension("png");
        if !output.status.success() || !produced.is_file() {
            return Err(ConvertError::ConversionFailure(format!(
                "Failed to render page {} with {}: {}",
                page,
                program_name(&self.binary),
                output.diagnostics()
            )));
        }
        Ok(produced)
    }
}

#[cfg(all(test, unix))]
pub(crate) mod testing {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// A stand-in rasterizer that copies `image` to `<prefix>.png`.
    pub fn fake_rasterizer(dir: &Path, image: &Path) -> PathBuf {
        let script = format!(
            "#!/bin/sh\nfor last; do :; done\ncp '{}' \"$last.png\"\n",
            image.display()
        );
        let path = dir.join("fake-pdftoppm");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}
