//! Slug allocation for articles and their taxonomy.
//!
//! A slug is the normalized title plus a random hex suffix, bounded by the
//! column's maximum length. The existence check only makes collisions rare;
//! the store's unique index is what actually guarantees uniqueness.

use rand::Rng;
use std::future::Future;

pub const SEPARATOR: char = '-';
pub const FRAGMENT_LEN: usize = 8;
/// Separator plus fragment.
pub const SUFFIX_LEN: usize = FRAGMENT_LEN + 1;
pub const FALLBACK_BASE: &str = "article";
/// Upper bound on existence probes per [`SlugAllocator::allocate_with`] call.
pub const MAX_PROBES: u32 = 64;

/// Lowercase ASCII slug: alphanumeric runs joined by single `-`.
pub fn slugify(text: &str) -> String {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

pub fn slugify_or(text: &str, fallback: &str) -> String {
    let slug = slugify(text);
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

fn random_hex(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Shape {
    Empty,
    Random(usize),
    Suffixed(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlugAllocator {
    max_length: usize,
}

impl SlugAllocator {
    pub fn new(max_length: usize) -> Self {
        SlugAllocator { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn shape(&self, title: &str, fallback: &str) -> Shape {
        if self.max_length == 0 {
            return Shape::Empty;
        }
        if self.max_length <= SUFFIX_LEN {
            return Shape::Random(self.max_length);
        }

        let room = self.max_length - SUFFIX_LEN;
        let mut base = slugify_or(title, fallback);
        base.truncate(room);
        let trimmed = base.trim_end_matches(SEPARATOR);
        if trimmed.is_empty() {
            let mut fallback = fallback.to_string();
            fallback.truncate(room);
            Shape::Suffixed(fallback)
        } else {
            Shape::Suffixed(trimmed.to_string())
        }
    }

    fn candidate(shape: &Shape) -> String {
        let mut rng = rand::thread_rng();
        match shape {
            Shape::Empty => String::new(),
            Shape::Random(len) => random_hex(&mut rng, *len),
            Shape::Suffixed(base) => {
                format!("{base}{SEPARATOR}{}", random_hex(&mut rng, FRAGMENT_LEN))
            }
        }
    }

    /// One suffixed candidate, unchecked.
    pub fn draw(&self, title: &str, fallback: &str) -> String {
        Self::candidate(&self.shape(title, fallback))
    }

    /// Keeps drawing fresh suffixes until `exists` reports a free candidate.
    pub fn allocate(&self, title: &str, mut exists: impl FnMut(&str) -> bool) -> String {
        let shape = self.shape(title, FALLBACK_BASE);
        if shape == Shape::Empty {
            return String::new();
        }
        loop {
            let candidate = Self::candidate(&shape);
            if !exists(&candidate) {
                return candidate;
            }
        }
    }

    /// Same as [`allocate`](Self::allocate) against a fallible, asynchronous
    /// lookup. Gives up with `Ok(None)` after [`MAX_PROBES`] taken candidates.
    pub async fn allocate_with<F, Fut, E>(
        &self,
        title: &str,
        fallback: &str,
        mut exists: F,
    ) -> Result<Option<String>, E>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        let shape = self.shape(title, fallback);
        if shape == Shape::Empty {
            return Ok(Some(String::new()));
        }
        for _ in 0..MAX_PROBES {
            let candidate = Self::candidate(&shape);
            if !exists(candidate.clone()).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

pub fn allocate(title: &str, max_length: usize, exists: impl FnMut(&str) -> bool) -> String {
    SlugAllocator::new(max_length).allocate(title, exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use regex::Regex;
    use std::collections::HashSet;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Example Post"), "example-post");
        assert_eq!(slugify("  Hello,   World!! "), "hello-world");
        assert_eq!(slugify("C++ & Rust: 2023"), "c-rust-2023");
        assert_eq!(slugify("한국어 제목"), "");
        assert_eq!(slugify_or("한국어", "tag"), "tag");
    }

    #[test]
    fn title_gets_hex_suffix() {
        let slug = allocate("Example Post", 50, |_| false);
        let pattern = Regex::new(r"^example-post-[0-9a-f]{8}$").unwrap();
        assert!(pattern.is_match(&slug), "{slug}");
    }

    #[test]
    fn non_ascii_title_falls_back() {
        let slug = allocate("日本語のタイトル", 50, |_| false);
        assert!(slug.starts_with("article-"), "{slug}");
        assert_eq!(slug.len(), "article-".len() + FRAGMENT_LEN);
    }

    #[test]
    fn base_is_truncated_without_trailing_separator() {
        // room for 6 characters of base: "hello-" must become "hello"
        let slug = allocate("Hello World", 15, |_| false);
        assert!(slug.starts_with("hello-"));
        assert!(!slug.starts_with("hello--"));
        assert_eq!(slug.len(), 14);
    }

    #[test]
    fn tiny_bound_keeps_a_fallback_base() {
        let slug = allocate("!!!", 12, |_| false);
        assert!(slug.starts_with("art-"), "{slug}");
        assert_eq!(slug.len(), 12);
    }

    #[test]
    fn no_room_for_a_base_yields_pure_hex() {
        for bound in 1..=SUFFIX_LEN {
            let slug = allocate("Example Post", bound, |_| false);
            assert_eq!(slug.len(), bound);
            assert!(slug.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
        assert_eq!(allocate("Example Post", 0, |_| true), "");
    }

    #[test]
    fn taken_candidates_are_retried() {
        let mut probes = 0;
        let slug = allocate("Example Post", 50, |_| {
            probes += 1;
            probes < 4
        });
        assert_eq!(probes, 4);
        assert!(slug.starts_with("example-post-"));
    }

    #[test]
    fn repeated_titles_get_distinct_slugs() {
        let mut taken = HashSet::new();
        for _ in 0..200 {
            let slug = allocate("Example Post", 50, |c| taken.contains(c));
            assert!(taken.insert(slug));
        }
    }

    #[tokio::test]
    async fn async_allocation_gives_up_after_max_probes() {
        let allocator = SlugAllocator::new(50);
        let mut calls = 0;
        let slug = allocator
            .allocate_with("busy", FALLBACK_BASE, |_| {
                calls += 1;
                async { Ok::<_, ()>(true) }
            })
            .await
            .unwrap();
        assert_eq!(slug, None);
        assert_eq!(calls, MAX_PROBES);
    }

    #[tokio::test]
    async fn async_allocation_propagates_lookup_errors() {
        let allocator = SlugAllocator::new(50);
        let result = allocator
            .allocate_with("anything", "tag", |_| async { Err::<bool, _>("down") })
            .await;
        assert_eq!(result, Err("down"));
    }

    proptest! {
        #[test]
        fn slug_never_exceeds_bound(title in ".{0,120}", bound in 1usize..80) {
            let slug = allocate(&title, bound, |_| false);
            prop_assert!(slug.len() <= bound);
            prop_assert!(!slug.is_empty());
            prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }
    }
}
