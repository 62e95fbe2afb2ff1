pub const EXCERPT_CHARS: usize = 200;

/// Fills an excerpt from the raw content unless one already exists.
///
/// The excerpt is the leading [`EXCERPT_CHARS`] characters of the markdown
/// source, syntax and all.
pub fn derive(content: &str, existing_excerpt: &str) -> String {
    if !existing_excerpt.is_empty() {
        return existing_excerpt.to_string();
    }
    content.chars().take(EXCERPT_CHARS).collect()
}
