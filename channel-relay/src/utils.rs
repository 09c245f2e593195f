/// Split text into consecutive pieces of at most `max_chars` characters.
///
/// Boundaries fall on character boundaries, so multi-byte text is never cut
/// inside a code point. Concatenating the pieces yields the input.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (offset, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&text[start..]);
    chunks
}

/// Cut `text` to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}

/// Substitute `{channel}` in a URL template.
pub fn expand_template(template: &str, channel: &str) -> String {
    template.replace("{channel}", channel)
}
