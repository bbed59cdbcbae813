/// Ceiling applied to each of a command result's `out` and `err` fields.
pub const TOOL_OUTPUT_LIMIT: usize = 4 * 1024;

/// Ceiling applied to outbound chat message bodies.
pub const CHAT_MESSAGE_LIMIT: usize = 8 * 1024;

/// Cut `text` to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
