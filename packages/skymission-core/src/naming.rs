// Utility functions to derive consistent output file names across the pipeline.

use std::path::Path;

pub const DEFAULT_NAMING_FIELD: &str = "DYNM";
const MAX_NAME_CHARS: usize = 200;

/// Make an attribute value safe to use as a file name.
///
/// Forbidden characters become `_`, runs of CR/LF/TAB become one space,
/// surrounding whitespace and trailing dots are removed and the result is
/// capped at 200 characters. May return an empty string.
pub fn sanitize_filename(raw: &str) -> String {
    let mut replaced = String::with_capacity(raw.len());
    let mut in_control_run = false;
    for ch in raw.chars() {
        match ch {
            '\r' | '\n' | '\t' => {
                if !in_control_run {
                    replaced.push(' ');
                }
                in_control_run = true;
                continue;
            }
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => replaced.push('_'),
            other => replaced.push(other),
        }
        in_control_run = false;
    }

    let trimmed = replaced.trim().trim_end_matches(['.', ' ']);
    let capped: String = trimmed.chars().take(MAX_NAME_CHARS).collect();
    capped.trim_end_matches(['.', ' ']).to_string()
}

/// File stem of a source path, or "mission" when there is none.
pub fn source_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "mission".to_string())
}

/// Name for row `index` of `stem` when the row has no usable naming value.
pub fn row_fallback_name(stem: &str, index: usize) -> String {
    format!("{}_{}", stem, index)
}

/// Sanitized `candidate`, or `fallback` when nothing usable is left.
pub fn name_or_fallback(candidate: Option<&str>, fallback: &str) -> String {
    candidate
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Attribute text that is worth naming a file after: non-empty and not "none".
pub fn usable_attribute(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(trimmed)
    }
}
