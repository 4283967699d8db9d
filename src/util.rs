/// Truncate a string at a valid UTF-8 character boundary.
///
/// Returns a slice of at most `max_bytes` bytes, ending at a valid char boundary.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Last path segment of a URL, for short status lines ("Downloading: app.js").
///
/// Falls back to the whole input when there is nothing after the final `/`.
pub fn last_path_segment(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    match without_query.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => segment,
        _ => url,
    }
}
