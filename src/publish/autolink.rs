//! Bare URL detection for the markdown renderer.
//!
//! Two finders exist. Which one the renderer uses is fixed at compile time by
//! the `url-autolink` feature and exposed as [`FIND_LINKS`].

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkSpan {
    /// Byte offsets into the searched text.
    pub start: usize,
    pub end: usize,
    pub href: String,
}

pub type LinkFinder = fn(&str) -> Vec<LinkSpan>;

#[cfg(feature = "url-autolink")]
pub const FIND_LINKS: LinkFinder = find_with_url;

#[cfg(not(feature = "url-autolink"))]
pub const FIND_LINKS: LinkFinder = find_with_regex;

const PREFIXES: &[&str] = &["https://", "http://", "www."];
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ':', ';', '!', '?', '\'', '"', '*', '_', '~'];

fn is_terminator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '<' | '>' | '"' | '`')
}

/// Drops sentence punctuation and closing brackets that were not opened
/// inside the URL.
fn trim_candidate(candidate: &str) -> &str {
    let mut trimmed = candidate;
    loop {
        let before = trimmed.len();
        trimmed = trimmed.trim_end_matches(TRAILING_PUNCTUATION);
        for (open, close) in [('(', ')'), ('[', ']')] {
            if trimmed.ends_with(close)
                && trimmed.matches(close).count() > trimmed.matches(open).count()
            {
                trimmed = &trimmed[..trimmed.len() - 1];
            }
        }
        if trimmed.len() == before {
            return trimmed;
        }
    }
}

fn href_for(link: &str) -> String {
    if link.get(..4).map_or(false, |head| head.eq_ignore_ascii_case("www.")) {
        format!("http://{link}")
    } else {
        link.to_string()
    }
}

fn matching_prefix(rest: &str) -> Option<&'static str> {
    PREFIXES.iter().copied().find(|prefix| {
        rest.get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false)
    })
}

/// Finder backed by WHATWG URL parsing: a candidate only becomes a link if it
/// parses with a host.
pub fn find_with_url(text: &str) -> Vec<LinkSpan> {
    let mut spans = Vec::new();
    let mut previous: Option<char> = None;
    let mut skip_until = 0;

    for (idx, c) in text.char_indices() {
        let at_boundary = previous.map_or(true, |p| !p.is_alphanumeric() && !matches!(p, '/' | '@' | '.'));
        previous = Some(c);
        if idx < skip_until || !at_boundary {
            continue;
        }
        let rest = &text[idx..];
        let prefix = match matching_prefix(rest) {
            Some(p) => p,
            None => continue,
        };

        let end = rest.find(is_terminator).unwrap_or(rest.len());
        let link = trim_candidate(&rest[..end]);
        if link.len() <= prefix.len() {
            continue;
        }
        let href = href_for(link);
        let parsed = match Url::parse(&href) {
            Ok(url) => url,
            Err(_) => continue,
        };
        if parsed.host_str().map_or(true, str::is_empty) {
            continue;
        }

        spans.push(LinkSpan {
            start: idx,
            end: idx + link.len(),
            href,
        });
        skip_until = idx + link.len();
    }

    spans
}

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"`]+"#).expect("static pattern compiles")
});

/// Fallback finder: a single regular expression, no structural validation
/// beyond requiring something after the prefix.
pub fn find_with_regex(text: &str) -> Vec<LinkSpan> {
    URL_PATTERN
        .find_iter(text)
        .filter_map(|found| {
            let link = trim_candidate(found.as_str());
            let prefix = matching_prefix(link)?;
            if link.len() <= prefix.len() {
                return None;
            }
            Some(LinkSpan {
                start: found.start(),
                end: found.start() + link.len(),
                href: href_for(link),
            })
        })
        .collect()
}
