//! Deterministic truncation helpers for bounded output.
//!
//! Lengths are counted in `char`s, so a cut never lands inside a multi-byte
//! UTF-8 sequence. No token estimation: the same input always yields the same
//! output.

pub const ELLIPSIS: &str = "...";

/// Keep the first `max_chars` characters and append `...` when anything was cut.
/// Returns the (possibly shortened) text and whether it was truncated.
pub fn truncate_chars(input: &str, max_chars: usize) -> (String, bool) {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (format!("{}{}", &input[..byte_idx], ELLIPSIS), true),
        None => (input.to_string(), false),
    }
}

/// Collapse newlines/extra whitespace and bound length for previews.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars).0
}
