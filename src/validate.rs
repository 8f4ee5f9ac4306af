//! Name validation for anything that becomes part of a puter command line.
//!
//! Rejects empty names, characters illegal on the host filesystem (including
//! control characters), and Windows reserved device names. Runs before any
//! subprocess is spawned.

use regex::Regex;
use std::sync::OnceLock;

static INVALID_CHARS_RE: OnceLock<Regex> = OnceLock::new();

fn invalid_chars_re() -> &'static Regex {
    INVALID_CHARS_RE.get_or_init(|| Regex::new(r#"[<>:"|?*\x00-\x1F]"#).unwrap())
}

static RESERVED_RE: OnceLock<Regex> = OnceLock::new();

fn reserved_re() -> &'static Regex {
    RESERVED_RE.get_or_init(|| Regex::new(r"(?i)^(con|prn|aux|nul|com[0-9]|lpt[0-9])$").unwrap())
}

/// Validate a file, directory, site or app name. Returns the trimmed name.
pub fn validate_name(name: &str) -> Result<String, String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Name cannot be empty".to_string());
    }
    if invalid_chars_re().is_match(trimmed) {
        return Err("Name contains invalid characters".to_string());
    }
    if reserved_re().is_match(trimmed) {
        return Err("Name is reserved and cannot be used".to_string());
    }
    Ok(trimmed.to_string())
}
