//! Filename helpers for building pipeline output paths.
//!
//! Video identifiers come from remote instances and are used verbatim as
//! file stems, so they are sanitized for Windows, Linux and macOS before any
//! path is built from them.

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a video identifier for use as a file stem.
///
/// Invalid characters collapse into a single `_`, leading/trailing spaces and
/// dots are trimmed, reserved names get a `_` prefix and an empty result
/// becomes `"unnamed"`.
pub fn sanitize_file_stem(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    if WINDOWS_RESERVED_NAMES.iter().any(|reserved| upper == *reserved) {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// Normalize a container extension to its dot-prefixed form.
///
/// `"mkv"`, `".mkv"` and `" .MKV "` all become `".mkv"`. Returns `None` for
/// an empty or path-like extension.
pub fn normalize_extension(ext: &str) -> Option<String> {
    let bare = ext.trim().trim_start_matches('.');
    if bare.is_empty()
        || bare
            .chars()
            .any(|c| c.is_control() || c == '.' || WINDOWS_INVALID_CHARS.contains(&c))
    {
        return None;
    }
    Some(format!(".{}", bare.to_lowercase()))
}
