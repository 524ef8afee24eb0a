//! Sanitization of strings that originate from untrusted network input.

use regex::Regex;
use std::sync::OnceLock;

/// Maximum stored length of a device name, in characters.
pub const MAX_NAME_CHARS: usize = 100;

/// Maximum length of error text surfaced upward, in characters.
pub const MAX_ERROR_CHARS: usize = 200;

/// Placeholder stored when a device announces no name.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown device";

fn markup_pattern() -> &'static Regex {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    MARKUP.get_or_init(|| Regex::new(r"<[^>]*>").expect("static markup pattern"))
}

/// Clips `input` to `max_chars` characters without splitting a code point.
pub fn clip(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Clips `input` to `max_chars` and strips markup-like `<...>` substrings.
pub fn strip_markup(input: &str, max_chars: usize) -> String {
    markup_pattern()
        .replace_all(clip(input, max_chars), "")
        .into_owned()
}

/// Sanitizes a device name for storage; empty names get a placeholder.
pub fn device_name(input: &str, max_chars: usize) -> String {
    let cleaned = strip_markup(input, max_chars);
    if cleaned.trim().is_empty() {
        UNKNOWN_DEVICE_NAME.to_string()
    } else {
        cleaned
    }
}
