use crate::store::{ArticleStore, NewArticle, StoreError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use techblog_core::{Article, Category, Tag};

/// In-process store. Slugs and names are indexed with the same uniqueness
/// rules a database schema would enforce.
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    articles: DashMap<i64, Article>,
    article_slugs: DashMap<String, i64>,
    categories: DashMap<i64, Category>,
    category_names: DashMap<String, i64>,
    category_slugs: DashMap<String, i64>,
    tags: DashMap<i64, Tag>,
    tag_names: DashMap<String, i64>,
    tag_slugs: DashMap<String, i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn article_count(&self) -> usize {
        self.articles.len()
    }
}

/// Shared get-or-create for the two taxonomy types.
fn get_or_create<T: Clone>(
    rows: &DashMap<i64, T>,
    names: &DashMap<String, i64>,
    slugs: &DashMap<String, i64>,
    name: &str,
    slug: &str,
    make: impl FnOnce() -> (i64, T),
) -> Result<T, StoreError> {
    match names.entry(name.to_string()) {
        Entry::Occupied(existing) => rows
            .get(existing.get())
            .map(|row| row.value().clone())
            .ok_or(StoreError::Missing(*existing.get())),
        Entry::Vacant(vacant) => match slugs.entry(slug.to_string()) {
            Entry::Occupied(_) => Err(StoreError::SlugConflict(slug.to_string())),
            Entry::Vacant(slot) => {
                let (id, row) = make();
                slot.insert(id);
                vacant.insert(id);
                rows.insert(id, row.clone());
                Ok(row)
            }
        },
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn slug_exists(&self, candidate: &str, exclude: Option<i64>) -> Result<bool, StoreError> {
        Ok(self
            .article_slugs
            .get(candidate)
            .map(|owner| Some(*owner) != exclude)
            .unwrap_or(false))
    }

    async fn insert_article(&self, article: NewArticle) -> Result<Article, StoreError> {
        match self.article_slugs.entry(article.slug.clone()) {
            Entry::Occupied(_) => Err(StoreError::SlugConflict(article.slug)),
            Entry::Vacant(slot) => {
                let id = self.next_id();
                slot.insert(id);
                let article = article.into_article(id);
                self.articles.insert(id, article.clone());
                Ok(article)
            }
        }
    }

    async fn update_article(&self, article: &Article) -> Result<Article, StoreError> {
        let previous_slug = match self.articles.get(&article.id) {
            Some(stored) => stored.slug.clone(),
            None => return Err(StoreError::Missing(article.id)),
        };

        if previous_slug != article.slug {
            match self.article_slugs.entry(article.slug.clone()) {
                Entry::Occupied(owner) if *owner.get() != article.id => {
                    return Err(StoreError::SlugConflict(article.slug.clone()));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(article.id);
                }
            }
            if !previous_slug.is_empty() {
                self.article_slugs.remove(&previous_slug);
            }
        }

        self.articles.insert(article.id, article.clone());
        Ok(article.clone())
    }

    async fn article(&self, id: i64) -> Result<Option<Article>, StoreError> {
        Ok(self.articles.get(&id).map(|a| a.value().clone()))
    }

    async fn article_by_slug(&self, slug: &str) -> Result<Option<Article>, StoreError> {
        let id = match self.article_slugs.get(slug) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.article(id).await
    }

    async fn category_get_or_create(&self, name: &str, slug: &str) -> Result<Category, StoreError> {
        get_or_create(
            &self.categories,
            &self.category_names,
            &self.category_slugs,
            name,
            slug,
            || {
                let id = self.next_id();
                let category = Category {
                    id,
                    name: name.to_string(),
                    slug: slug.to_string(),
                    description: String::new(),
                };
                (id, category)
            },
        )
    }

    async fn tag_get_or_create(&self, name: &str, slug: &str) -> Result<Tag, StoreError> {
        get_or_create(
            &self.tags,
            &self.tag_names,
            &self.tag_slugs,
            name,
            slug,
            || {
                let id = self.next_id();
                let tag = Tag {
                    id,
                    name: name.to_string(),
                    slug: slug.to_string(),
                };
                (id, tag)
            },
        )
    }

    async fn delete_category(&self, id: i64) -> Result<(), StoreError> {
        let category = match self.categories.get(&id) {
            Some(c) => c.value().clone(),
            None => return Err(StoreError::Missing(id)),
        };
        if self.articles.iter().any(|a| a.category_id == id) {
            return Err(StoreError::Protected(category.name));
        }
        self.categories.remove(&id);
        self.category_names.remove(&category.name);
        self.category_slugs.remove(&category.slug);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn new_article(slug: &str, category_id: i64) -> NewArticle {
        let now = Utc::now();
        NewArticle {
            title: "Title".into(),
            slug: slug.into(),
            content: "Body".into(),
            excerpt: "Body".into(),
            published: false,
            category_id,
            tag_ids: vec![],
            image: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_slug_is_reported_as_conflict() {
        let store = MemoryStore::new();
        store.insert_article(new_article("same", 1)).await.unwrap();
        let err = store.insert_article(new_article("same", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::SlugConflict(slug) if slug == "same"));
    }

    #[tokio::test]
    async fn slug_exists_ignores_the_excluded_article() {
        let store = MemoryStore::new();
        let article = store.insert_article(new_article("kept", 1)).await.unwrap();
        assert!(store.slug_exists("kept", None).await.unwrap());
        assert!(!store.slug_exists("kept", Some(article.id)).await.unwrap());
        assert!(!store.slug_exists("other", None).await.unwrap());
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_category() {
        let store = MemoryStore::new();
        let first = store.category_get_or_create("Rust", "rust").await.unwrap();
        let second = store.category_get_or_create("Rust", "rust").await.unwrap();
        assert_eq!(first, second);

        let clash = store.category_get_or_create("rust!", "rust").await.unwrap_err();
        assert!(matches!(clash, StoreError::SlugConflict(_)));
    }

    #[tokio::test]
    async fn referenced_category_cannot_be_deleted() {
        let store = MemoryStore::new();
        let used = store.category_get_or_create("Used", "used").await.unwrap();
        let unused = store.category_get_or_create("Unused", "unused").await.unwrap();
        store.insert_article(new_article("a", used.id)).await.unwrap();

        assert!(matches!(
            store.delete_category(used.id).await,
            Err(StoreError::Protected(name)) if name == "Used"
        ));
        store.delete_category(unused.id).await.unwrap();
        assert!(matches!(
            store.delete_category(unused.id).await,
            Err(StoreError::Missing(_))
        ));
    }
}
