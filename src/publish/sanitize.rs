use ammonia::Builder;
use std::collections::{HashMap, HashSet};

pub const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "b", "strong", "i", "em", "u", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "code", "pre", "ol", "ul", "li", "a", "img", "table", "thead", "tbody", "tr", "th", "td",
    "div", "span",
];

pub const ALLOWED_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("a", &["href", "title"]),
    ("img", &["src", "alt", "title"]),
    ("code", &["class"]),
    ("pre", &["class"]),
    ("div", &["class"]),
    ("span", &["class"]),
    ("table", &["class"]),
    ("th", &["class"]),
    ("td", &["class"]),
    ("tr", &["class"]),
];

pub const ALLOWED_URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Elements removed together with everything inside them.
const DROPPED_WITH_CONTENT: &[&str] = &["script", "style"];

fn allow_list() -> Builder<'static> {
    let tags = ALLOWED_TAGS.iter().copied().collect::<HashSet<_>>();
    let attributes = ALLOWED_ATTRIBUTES
        .iter()
        .map(|(tag, attrs)| (*tag, attrs.iter().copied().collect::<HashSet<_>>()))
        .collect::<HashMap<_, _>>();

    let mut builder = Builder::default();
    builder
        .tags(tags)
        .tag_attributes(attributes)
        .generic_attributes(HashSet::new())
        .url_schemes(ALLOWED_URL_SCHEMES.iter().copied().collect())
        .clean_content_tags(DROPPED_WITH_CONTENT.iter().copied().collect())
        .link_rel(None)
        .strip_comments(true);
    builder
}

/// Reduces `html` to the allow-list. Anything not listed is deleted, never
/// escaped and kept; this cannot fail.
pub fn sanitize(html: &str) -> String {
    allow_list().clean(html).to_string()
}
