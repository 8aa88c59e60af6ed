//! Utility functions shared across the engine

use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving output name collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Wildcard match with `*` (any sequence), `?` (any one char) and `#` (any
/// digit). Matching is case-insensitive, which is what both group patterns
/// and feed filter terms want.
pub fn wild_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().flat_map(|c| c.to_lowercase()).collect();
    let v: Vec<char> = value.chars().flat_map(|c| c.to_lowercase()).collect();
    wild_match_at(&p, &v)
}

fn wild_match_at(p: &[char], v: &[char]) -> bool {
    match p.first() {
        None => v.is_empty(),
        Some('*') => {
            // try every split point, shortest first
            (0..=v.len()).any(|i| wild_match_at(&p[1..], &v[i..]))
        }
        Some('?') => !v.is_empty() && wild_match_at(&p[1..], &v[1..]),
        Some('#') => v.first().is_some_and(|c| c.is_ascii_digit()) && wild_match_at(&p[1..], &v[1..]),
        Some(&c) => v.first() == Some(&c) && wild_match_at(&p[1..], &v[1..]),
    }
}

/// Parse a filename from an NZB subject line.
///
/// Usenet subjects typically carry the filename in quotes, e.g.:
/// `Some.Movie.2024 [01/50] - "Some.Movie.2024.part01.rar" yEnc (1/100)`
///
/// The quoted token is used only if it contains a dot (a bare word in quotes
/// is usually a release name, not a filename); otherwise the whole subject
/// stands in until the first yEnc header confirms the real name.
pub fn filename_from_subject(subject: &str) -> String {
    if let Some(start) = subject.find('"')
        && let Some(end) = subject[start + 1..].find('"')
    {
        let candidate = &subject[start + 1..start + 1 + end];
        if candidate.contains('.') && !candidate.is_empty() {
            return candidate.to_string();
        }
    }
    subject.trim().to_string()
}

/// Whether a filename names a par2 volume (case-insensitive extension check).
pub fn is_par_filename(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.ends_with(".par2")
}

/// Find a non-colliding output path by appending `_duplicate<N>` before the
/// extension. Returns the original path untouched when it is free.
pub fn unique_output_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let candidate_name = match extension {
            Some(ext) => format!("{stem}_duplicate{i}.{ext}"),
            None => format!("{stem}_duplicate{i}"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
    }
    // pathological directory; give back the original and let the write fail
    path.to_path_buf()
}

/// Strip a trailing `.nzb` extension for display names.
pub fn job_name_from_filename(name: &str) -> String {
    let name = name.strip_suffix(".nzb").unwrap_or(name);
    name.to_string()
}

/// Sanitize one path component: no separators, no parent traversal.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            _ => c,
        })
        .collect();
    if cleaned == ".." || cleaned == "." {
        "_".to_string()
    } else {
        cleaned
    }
}
