//! Code extraction from free-form model text.

use std::sync::OnceLock;

use regex::Regex;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Only a Python tag followed by a newline is dropped; any other first
    // line belongs to the code.
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:(?i:python3?|py|ipython)[ \t]*\r?\n)?(.*?)```").expect("valid fence regex")
    })
}

/// Join every fenced region in order, each trimmed, separated by a newline.
/// Returns an empty string when the text holds no fence.
pub fn extract_code(text: &str) -> String {
    fence_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove fenced regions from prose, e.g. before showing a model answer to a
/// user.
pub fn strip_code_fences(text: &str) -> String {
    fence_re().replace_all(text, "").trim().to_string()
}
