use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::Regex;
use walkdir::WalkDir;

use crate::TransferError;
use crate::query::wildcard::{
    apply_placeholders, prepare_local_pattern, replace_tilde, root_path, trim_path,
};
use crate::transfer::helpers::normalize_path;

/// One local file chosen for upload, with its resolved remote target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCandidate {
    pub local_path: PathBuf,
    pub target_path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LocalPattern {
    pub pattern: String,
    pub target: String,
    pub recursive: bool,
    pub flat: bool,
    pub is_regex: bool,
    pub exclude_patterns: Vec<String>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        TransferError::PatternSyntax(format!("invalid regular expression '{}': {}", pattern, e))
            .into()
    })
}

/// A target without any `/` names a repository root.
fn normalize_target(target: &str) -> String {
    let mut t = target.to_string();
    if !t.contains('/') {
        t.push('/');
    }
    t
}

/// Target for a literal (non-pattern) file path.
pub fn single_file_target(local: &str, target: &str, flat: bool) -> String {
    if !target.ends_with('/') {
        return target.to_string();
    }
    if flat {
        format!("{}{}", target, file_name_of(local))
    } else {
        format!("{}{}", target, trim_path(local).trim_start_matches('/'))
    }
}

/// Target for a walked file once placeholders were substituted.
pub fn upload_target(flat: bool, path: &str, target: &str) -> String {
    if !target.ends_with('/') {
        return target.to_string();
    }
    if flat {
        format!("{}{}", target, file_name_of(path))
    } else {
        format!("{}{}", target, trim_path(path).trim_start_matches('/'))
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Walk the pattern's root and hand every matching file to `push`.
/// Returns the number of candidates produced. A missing root is
/// `PathNotFound`; an error from `push` stops the walk.
pub fn enumerate_local(
    source: &LocalPattern,
    push: &mut dyn FnMut(LocalCandidate) -> Result<()>,
) -> Result<usize> {
    let target = normalize_target(&source.target);
    let pattern = replace_tilde(&source.pattern);
    let root = root_path(&pattern, source.is_regex);
    let root_p = Path::new(&root);
    if !root_p.exists() {
        return Err(TransferError::PathNotFound(root).into());
    }

    if !root_p.is_dir() {
        let size = std::fs::metadata(root_p)?.len();
        push(LocalCandidate {
            local_path: root_p.to_path_buf(),
            target_path: single_file_target(&root, &target, source.flat),
            size,
        })?;
        return Ok(1);
    }

    let re = compile(&prepare_local_pattern(&pattern, source.is_regex))?;
    let excludes = source
        .exclude_patterns
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| compile(&prepare_local_pattern(&replace_tilde(p), source.is_regex)))
        .collect::<Result<Vec<_>>>()?;

    let max_depth = if source.recursive { usize::MAX } else { 1 };
    let mut produced = 0usize;
    for entry in WalkDir::new(root_p).max_depth(max_depth).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("[enumerate] skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let walked = entry.path().to_string_lossy().to_string();
        let walked = walked.strip_prefix("./").unwrap_or(&walked).to_string();
        let matched = normalize_path(&walked, false);

        if excludes.iter().any(|ex| ex.is_match(&matched)) {
            tracing::debug!("[enumerate] excluded {}", matched);
            continue;
        }
        if !re.is_match(&matched) {
            continue;
        }
        let resolved = apply_placeholders(&re, &matched, &target);
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        push(LocalCandidate {
            local_path: entry.path().to_path_buf(),
            target_path: upload_target(source.flat, &matched, &resolved),
            size,
        })?;
        produced += 1;
    }
    Ok(produced)
}

pub fn collect_local(source: &LocalPattern) -> Result<Vec<LocalCandidate>> {
    let mut out = Vec::new();
    enumerate_local(source, &mut |c| {
        out.push(c);
        Ok(())
    })?;
    Ok(out)
}
