use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

// Lightweight path display wrapper that renders with forward slashes.
// Avoids allocating strings until actually formatted for logs.
pub(crate) struct DisplayPath<'a>(pub(crate) &'a Path);

impl<'a> std::fmt::Display for DisplayPath<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.to_string_lossy().to_string();
        let out = normalize_path(&s, true);
        f.write_str(&out)
    }
}

pub(crate) fn display_path(p: &Path) -> DisplayPath<'_> {
    DisplayPath(p)
}

/// Normalize a path-like string for matching and remote paths:
/// - converts backslashes to forward slashes
/// - collapses repeated slashes
/// - optionally preserves a trailing slash (it marks a directory target)
pub fn normalize_path(p: &str, preserve_trailing_slash: bool) -> String {
    if p.is_empty() {
        return String::new();
    }
    let mut s = p.replace('\\', "/");
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    if !preserve_trailing_slash {
        // Strip trailing slashes, but keep root "/"
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
    }
    s
}

/// Fresh temporary file next to `dest`, named `.<name>.ap.part<i>.XXXXXX`
/// (`<i>` is the range index of a split download). Every call gets its own
/// file, so concurrent downloads to the same destination never share one.
/// Dropped without `persist` it is removed.
pub(crate) fn part_file(dest: &Path, index: Option<usize>) -> Result<NamedTempFile> {
    let dir = match dest.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let name = dest.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let prefix = match index {
        Some(i) => format!(".{}.ap.part{}.", name, i),
        None => format!(".{}.ap.part.", name),
    };
    tempfile::Builder::new()
        .prefix(&prefix)
        .tempfile_in(dir)
        .with_context(|| format!("create temporary file in {}", dir.display()))
}

/// Move a finished part file onto `dest`, replacing what is there.
pub(crate) fn persist_part(part: NamedTempFile, dest: &Path) -> Result<()> {
    part.persist(dest)
        .map_err(|e| e.error)
        .with_context(|| format!("rename temporary file to {}", dest.display()))?;
    Ok(())
}

/// Split `dir/file` into its directory (with trailing `/`, or empty) and file part.
pub(crate) fn split_dir_file(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("", path),
    }
}
