//! Output normalization for captured puter CLI text.
//!
//! Raw output runs through a fixed, ordered pipeline of pure text stages:
//!
//! 1. [`strip_ansi`] — remove ANSI escape sequences (both modes)
//! 2. [`strip_shell_chrome`] — remove the REPL banner, help hint, goodbye
//!    and prompt lines, and drop blank lines (shell mode only)
//! 3. final trim (both modes)
//!
//! Each stage is idempotent, so [`clean_output`] is too: re-normalizing
//! already-normalized text yields the same text.

use regex::Regex;
use std::sync::OnceLock;

static ANSI_RE: OnceLock<Regex> = OnceLock::new();

/// CSI escape sequences, plus the bare `[NNm` residue the puter CLI leaves
/// behind when the ESC byte has already been eaten by a pipe.
fn ansi_re() -> &'static Regex {
    ANSI_RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]|\[[0-9]+m").unwrap())
}

static PROMPT_RE: OnceLock<Regex> = OnceLock::new();

/// Shell prompt lines: `puter@<username>>`.
fn prompt_re() -> &'static Regex {
    PROMPT_RE.get_or_init(|| Regex::new(r"^puter@\w+>").unwrap())
}

static USERNAME_RE: OnceLock<Regex> = OnceLock::new();

fn username_re() -> &'static Regex {
    USERNAME_RE.get_or_init(|| Regex::new(r"puter@(\w+)>").unwrap())
}

/// Remove ANSI escape sequences.
///
/// A single removal pass can splice the two halves of a broken escape into a
/// new match, so this runs to a fixpoint to stay idempotent.
pub fn strip_ansi(text: &str) -> String {
    let mut out = ansi_re().replace_all(text, "").into_owned();
    while ansi_re().is_match(&out) {
        out = ansi_re().replace_all(&out, "").into_owned();
    }
    out
}

/// Remove interactive-shell noise: the welcome banner, help hint, goodbye
/// message and prompt lines, plus blank lines.
pub fn strip_shell_chrome(text: &str) -> String {
    text.lines()
        .filter(|line| {
            !(line.contains("Welcome to Puter-CLI")
                || line.contains("Type \"help\"")
                || line.contains("Goodbye!")
                || prompt_re().is_match(line))
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run the full pipeline. Shell-mode stages apply only to output captured
/// from the interactive `puter shell` path.
pub fn clean_output(raw: &str, shell_mode: bool) -> String {
    let cleaned = strip_ansi(raw);
    let cleaned = if shell_mode {
        strip_shell_chrome(&cleaned)
    } else {
        cleaned
    };
    cleaned.trim().to_string()
}

/// Pull the username out of prompt residue (`puter@alice>`) in direct-mode
/// output. Used by the whoami probe.
pub fn extract_username(text: &str) -> Option<String> {
    username_re()
        .captures(text)
        .map(|c| c[1].to_string())
}
