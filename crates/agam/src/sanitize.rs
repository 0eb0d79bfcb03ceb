//! Helpers for cleaning client-supplied names and for keeping full paths
//! out of tracing span attributes.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields. Reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Last path component of a client-supplied name, splitting on both
/// separator styles regardless of the host platform.
fn base_name(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw)
}

/// Reduces a requested output name to a bare base name.
///
/// - `../../etc/passwd` → `passwd`
/// - `report.pdf` with extension `pdf` → `report`
/// - empty, `.` or `..` → `default`
///
/// A warning is logged whenever directory components had to be stripped.
pub fn sanitize_output_filename(requested: Option<&str>, default: &str, extension: &str) -> String {
    let Some(raw) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
        return default.to_string();
    };

    let mut name = base_name(raw).trim().to_string();
    name.retain(|c| !c.is_control());

    let suffix = format!(".{}", extension.to_ascii_lowercase());
    if name.to_ascii_lowercase().ends_with(&suffix) && name.len() > suffix.len() {
        name.truncate(name.len() - suffix.len());
    }

    let name = match name.as_str() {
        "" | "." | ".." => default.to_string(),
        _ => name,
    };

    if base_name(raw) != raw {
        tracing::warn!(requested = raw, sanitized = %name, "Output filename was sanitized");
    }

    name
}

/// Makes a name safe to embed in a storage path: base name only, with
/// anything outside `[A-Za-z0-9._-]` replaced by `_` and no leading dots.
///
/// The extension survives: `..txt` becomes `file.txt`, not `txt`.
pub fn safe_file_name(raw: &str) -> String {
    let mapped: String = base_name(raw)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = mapped.trim_start_matches('.');
    if trimmed.is_empty() {
        return "file".to_string();
    }
    // Only dots before the extension: trimming them would eat the dot too.
    let had_extension = Path::new(&mapped).extension().is_some();
    if had_extension && !trimmed.contains('.') {
        return format!("file.{}", trimmed);
    }
    trimmed.to_string()
}
