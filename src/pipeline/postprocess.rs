//! Post-processing: deterministic cleanup of model-written layout descriptions.
//!
//! The description is shown verbatim under the page thumbnail, so the
//! artefacts models like to add (a wrapping code fence, CRLF line endings,
//! runs of blank lines, zero-width characters) are stripped here rather than
//! argued away in the prompt. None of the rules touch the wording.
//!
//! ## Rule Order
//!
//! Fences are stripped first so the fence regex sees the raw reply; line
//! endings are normalised before any line-based rule runs; outer whitespace
//! is trimmed last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to a raw description.
///
/// 1. Strip one outer code fence (` ``` `, ` ```markdown `, ` ```text `)
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to one
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Trim leading and trailing blank space
pub fn clean_description(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip outer code fence ──────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z]*\r?\n(.*?)\r?\n```\s*$").expect("valid fence regex")
});

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ──────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ───────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse runs of blank lines ────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank-line regex"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 5: Remove invisible Unicode ────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}
