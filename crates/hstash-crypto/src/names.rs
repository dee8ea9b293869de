//! Object naming: opaque, per-user storage keys
//!
//! The stored name never contains the user's original filename, only its
//! extension, so listing the bucket leaks nothing beyond file types.

use rand::RngCore;
use std::path::Path;

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_FILENAME_LEN: usize = 255;

/// Replace path and shell metacharacters with `_` and cap the length.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .take(MAX_FILENAME_LEN)
        .collect()
}

/// Prefix under which all of a user's objects live.
pub fn user_prefix(user_id: &str) -> String {
    format!("{user_id}/")
}

/// Build a fresh object name: `{user_id}/{16 random hex}{.ext}`.
pub fn generate_object_name(user_id: &str, original_filename: &str) -> String {
    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);

    let sanitized = sanitize_filename(original_filename);
    let ext = Path::new(&sanitized)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    format!("{}{}{}", user_prefix(user_id), hex::encode(suffix), ext)
}
