use crate::config::PublishingConfig;
use crate::error::{PublishError, ValidationError};
use crate::models::article::TITLE_COLUMN_WIDTH;
use crate::publish::excerpt;
use crate::publish::image::ImageValidator;
use crate::publish::markdown::render;
use crate::publish::slug::{slugify_or, SlugAllocator, FALLBACK_BASE, MAX_PROBES};
use crate::store::{ArticleStore, BlobStore, NewArticle, StoreError, StoredBlob};
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeSet;
use std::future::Future;
use techblog_core::{Article, ArticleDraft, ArticleEdit, Category, Tag};
use tracing::{debug, info, instrument, warn};

const CATEGORY_FALLBACK: &str = "category";
const TAG_FALLBACK: &str = "tag";

/// Validates, slugs and stores articles.
pub struct Publisher<S, B> {
    store: S,
    blobs: B,
    slugs: SlugAllocator,
    images: ImageValidator,
    write_attempts: u32,
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingRequiredField(field));
    }
    Ok(trimmed.to_string())
}

/// Required, and no longer than the `title` column, counted in characters.
fn bounded_title(value: &str) -> Result<String, ValidationError> {
    let title = required(value, "title")?;
    if title.chars().count() > TITLE_COLUMN_WIDTH {
        return Err(ValidationError::FieldTooLong {
            field: "title",
            max: TITLE_COLUMN_WIDTH,
        });
    }
    Ok(title)
}

/// Trimmed, non-empty, first occurrence wins.
fn tag_names(tags: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && seen.insert(*t))
        .collect()
}

impl<S, B> Publisher<S, B>
where
    S: ArticleStore,
    B: BlobStore,
{
    pub fn new(store: S, blobs: B, config: &PublishingConfig) -> Self {
        Publisher {
            store,
            blobs,
            slugs: SlugAllocator::new(config.slug_max_length),
            images: ImageValidator::new(config.upload.clone()),
            write_attempts: config.slug_write_attempts.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Editor preview. Identical to what the article page shows.
    pub fn preview(&self, raw: &str) -> String {
        render(raw)
    }

    async fn free_slug(&self, title: &str, exclude: Option<i64>) -> Result<String, PublishError> {
        let store = &self.store;
        let found = self
            .slugs
            .allocate_with(title, FALLBACK_BASE, move |candidate| async move {
                store.slug_exists(&candidate, exclude).await
            })
            .await?;
        found.ok_or(PublishError::Conflict {
            attempts: MAX_PROBES,
        })
    }

    /// Get-or-create with the plain slug first, suffixed slugs after that.
    async fn taxonomy<T, F, Fut>(&self, name: &str, fallback: &str, mut create: F) -> Result<T, PublishError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut slug = slugify_or(name, fallback);
        for attempt in 1..=self.write_attempts {
            match create(slug.clone()).await {
                Ok(row) => return Ok(row),
                Err(StoreError::SlugConflict(taken)) => {
                    warn!(attempt, %taken, "taxonomy slug taken, retrying");
                    slug = self.slugs.draw(name, fallback);
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(PublishError::Conflict {
            attempts: self.write_attempts,
        })
    }

    async fn category(&self, name: &str) -> Result<Category, PublishError> {
        let store = &self.store;
        self.taxonomy(name, CATEGORY_FALLBACK, |slug| async move {
            store.category_get_or_create(name, &slug).await
        })
        .await
    }

    async fn tag_ids(&self, tags: &[String]) -> Result<Vec<i64>, PublishError> {
        let store = &self.store;
        let mut ids = Vec::new();
        for name in tag_names(tags) {
            let tag: Tag = self
                .taxonomy(name, TAG_FALLBACK, |slug| async move {
                    store.tag_get_or_create(name, &slug).await
                })
                .await?;
            ids.push(tag.id);
        }
        Ok(ids)
    }

    async fn store_image(&self, image: Bytes) -> Result<StoredBlob, PublishError> {
        let decoded = match self.images.validate(image) {
            Ok(decoded) => decoded,
            Err(why) => {
                warn!(%why, "rejected upload");
                return Err(why.into());
            }
        };
        debug!(format = %decoded.format, width = decoded.width, height = decoded.height, "accepted upload");
        Ok(self.blobs.put(decoded.format, decoded.bytes).await?)
    }

    async fn discard(&self, blob: Option<StoredBlob>) {
        if let Some(blob) = blob.filter(|b| b.fresh) {
            if let Err(why) = self.blobs.remove(&blob.path).await {
                warn!(path = %blob.path, %why, "could not remove orphaned image");
            }
        }
    }

    /// Creates an article. A rejected image stops everything before any
    /// write; a failed write removes the image it stored.
    #[instrument(skip_all, fields(title = %draft.title))]
    pub async fn create_article(&self, draft: ArticleDraft, image: Option<Bytes>) -> Result<Article, PublishError> {
        let title = bounded_title(&draft.title)?;
        let category = required(&draft.category, "category")?;

        let blob = match image {
            Some(bytes) => Some(self.store_image(bytes).await?),
            None => None,
        };

        let created = self.insert(title, category, draft, blob.as_ref().map(|b| b.path.clone())).await;
        if created.is_err() {
            self.discard(blob).await;
        }
        created
    }

    async fn insert(
        &self,
        title: String,
        category: String,
        draft: ArticleDraft,
        image: Option<String>,
    ) -> Result<Article, PublishError> {
        let category = self.category(&category).await?;
        let tag_ids = self.tag_ids(&draft.tags).await?;
        let excerpt = excerpt::derive(&draft.content, draft.excerpt.as_deref().unwrap_or_default());
        let now = Utc::now();

        for attempt in 1..=self.write_attempts {
            let slug = self.free_slug(&title, None).await?;
            let article = NewArticle {
                title: title.clone(),
                slug,
                content: draft.content.clone(),
                excerpt: excerpt.clone(),
                published: draft.published,
                category_id: category.id,
                tag_ids: tag_ids.clone(),
                image: image.clone(),
                created_at: now,
                updated_at: now,
            };
            match self.store.insert_article(article).await {
                Ok(article) => {
                    info!(id = article.id, slug = %article.slug, "article created");
                    return Ok(article);
                }
                Err(StoreError::SlugConflict(slug)) => {
                    warn!(attempt, %slug, "slug taken at write, retrying");
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(attempts = self.write_attempts, "giving up on a unique slug");
        Err(PublishError::Conflict {
            attempts: self.write_attempts,
        })
    }

    /// Applies `edit`. The slug stays as first allocated; only an article that
    /// somehow has none gets a new one.
    #[instrument(skip(self, edit, image))]
    pub async fn edit_article(&self, id: i64, edit: ArticleEdit, image: Option<Bytes>) -> Result<Article, PublishError> {
        let mut article = self.store.article(id).await?.ok_or(PublishError::NotFound(id))?;

        if let Some(title) = &edit.title {
            article.title = bounded_title(title)?;
        }
        let category = edit
            .category
            .as_deref()
            .map(|name| required(name, "category"))
            .transpose()?;

        let blob = match image {
            Some(bytes) => Some(self.store_image(bytes).await?),
            None => None,
        };

        let applied = self.apply(&mut article, edit, category, blob.as_ref()).await;
        let updated = match applied {
            Ok(()) => self.update(article).await,
            Err(why) => Err(why),
        };
        if updated.is_err() {
            self.discard(blob).await;
        }
        updated
    }

    async fn apply(
        &self,
        article: &mut Article,
        edit: ArticleEdit,
        category: Option<String>,
        blob: Option<&StoredBlob>,
    ) -> Result<(), PublishError> {
        if let Some(content) = edit.content {
            article.content = content;
        }
        if let Some(excerpt) = edit.excerpt {
            article.excerpt = excerpt;
        }
        article.excerpt = excerpt::derive(&article.content, &article.excerpt);
        if let Some(published) = edit.published {
            article.published = published;
        }
        if let Some(name) = category {
            article.category_id = self.category(&name).await?.id;
        }
        if let Some(tags) = &edit.tags {
            article.tag_ids = self.tag_ids(tags).await?;
        }
        if let Some(blob) = blob {
            article.image = Some(blob.path.clone());
        }
        article.updated_at = Utc::now();
        Ok(())
    }

    async fn update(&self, mut article: Article) -> Result<Article, PublishError> {
        if !article.slug.is_empty() {
            let updated = self.store.update_article(&article).await?;
            info!(id = updated.id, "article updated");
            return Ok(updated);
        }

        for attempt in 1..=self.write_attempts {
            article.slug = self.free_slug(&article.title, Some(article.id)).await?;
            match self.store.update_article(&article).await {
                Ok(updated) => {
                    info!(id = updated.id, slug = %updated.slug, "article updated with new slug");
                    return Ok(updated);
                }
                Err(StoreError::SlugConflict(slug)) => {
                    warn!(attempt, %slug, "slug taken at write, retrying");
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(PublishError::Conflict {
            attempts: self.write_attempts,
        })
    }

    /// Replaces the article's image.
    pub async fn attach_image(&self, id: i64, image: Bytes) -> Result<Article, PublishError> {
        self.edit_article(id, ArticleEdit::default(), Some(image)).await
    }

    #[instrument(skip(self))]
    pub async fn delete_category(&self, id: i64) -> Result<(), PublishError> {
        match self.store.delete_category(id).await {
            Ok(()) => {
                info!("category deleted");
                Ok(())
            }
            Err(StoreError::Protected(name)) => {
                warn!(%name, "category still referenced, not deleted");
                Err(PublishError::Protected(name))
            }
            Err(other) => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::image::tests::encoded;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use techblog_core::ImageFormat;

    #[derive(Default)]
    struct RecordingBlobs {
        stored: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for RecordingBlobs {
        async fn put(&self, format: ImageFormat, bytes: Bytes) -> Result<StoredBlob, StoreError> {
            let path = format!("articles/{}.{}", bytes.len(), format.extension());
            self.stored.lock().unwrap().push(path.clone());
            Ok(StoredBlob { path, fresh: true })
        }

        async fn remove(&self, path: &str) -> Result<(), StoreError> {
            self.removed.lock().unwrap().push(path.to_string());
            Ok(())
        }
    }

    fn publisher() -> Publisher<MemoryStore, RecordingBlobs> {
        Publisher::new(MemoryStore::new(), RecordingBlobs::default(), &PublishingConfig::default())
    }

    fn draft(title: &str) -> ArticleDraft {
        ArticleDraft {
            title: title.into(),
            content: "Some **markdown** body".into(),
            category: "Rust".into(),
            tags: vec!["async".into(), " async ".into(), "".into(), "tokio".into()],
            ..ArticleDraft::default()
        }
    }

    #[tokio::test]
    async fn missing_fields_are_reported_by_name() {
        let publisher = publisher();
        let err = publisher.create_article(draft("   "), None).await.unwrap_err();
        assert!(matches!(err, PublishError::Validation(ValidationError::MissingRequiredField("title"))));

        let mut no_category = draft("Title");
        no_category.category.clear();
        let err = publisher.create_article(no_category, None).await.unwrap_err();
        assert!(matches!(err, PublishError::Validation(ValidationError::MissingRequiredField("category"))));
        assert_eq!(publisher.store().article_count(), 0);
    }

    #[tokio::test]
    async fn titles_are_bounded_in_characters() {
        let publisher = publisher();
        let err = publisher.create_article(draft(&"é".repeat(201)), None).await.unwrap_err();
        assert!(matches!(
            err,
            PublishError::Validation(ValidationError::FieldTooLong { field: "title", max: 200 })
        ));
        assert_eq!(publisher.store().article_count(), 0);

        let created = publisher.create_article(draft(&"é".repeat(200)), None).await.unwrap();
        assert_eq!(created.title.chars().count(), 200);
        assert!(created.slug.len() <= 50);

        let err = publisher
            .edit_article(
                created.id,
                ArticleEdit {
                    title: Some("x".repeat(201)),
                    ..ArticleEdit::default()
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Validation(ValidationError::FieldTooLong { .. })));
        let stored = publisher.store().article(created.id).await.unwrap().unwrap();
        assert_eq!(stored.title, created.title);
    }

    #[tokio::test]
    async fn create_fills_excerpt_and_deduplicates_tags() {
        let publisher = publisher();
        let article = publisher.create_article(draft("Example Post"), None).await.unwrap();
        assert_eq!(article.excerpt, "Some **markdown** body");
        assert_eq!(article.tag_ids.len(), 2);
        assert!(article.slug.starts_with("example-post-"));
        assert_eq!(article.created_at, article.updated_at);
    }

    #[tokio::test]
    async fn rejected_image_writes_nothing() {
        let publisher = publisher();
        let err = publisher
            .create_article(draft("With image"), Some(Bytes::from_static(b"plain text")))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Validation(ValidationError::NotAnImage)));
        assert_eq!(publisher.store().article_count(), 0);
        assert!(publisher.blobs().stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepted_image_is_referenced() {
        let publisher = publisher();
        let png = encoded(16, 16, image::ImageFormat::Png);
        let article = publisher
            .create_article(draft("With image"), Some(Bytes::from(png)))
            .await
            .unwrap();
        let path = article.image.unwrap();
        assert!(path.ends_with(".png"));
        assert_eq!(*publisher.blobs().stored.lock().unwrap(), vec![path]);
    }

    #[tokio::test]
    async fn edits_keep_the_slug() {
        let publisher = publisher();
        let created = publisher.create_article(draft("Example Post"), None).await.unwrap();
        let edited = publisher
            .edit_article(
                created.id,
                ArticleEdit {
                    title: Some("A Completely New Title".into()),
                    content: Some("New body".into()),
                    ..ArticleEdit::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(edited.slug, created.slug);
        assert_eq!(edited.title, "A Completely New Title");
        assert_eq!(edited.created_at, created.created_at);
        assert!(edited.updated_at >= created.updated_at);
        // the excerpt was already filled, so it is not regenerated
        assert_eq!(edited.excerpt, created.excerpt);
    }

    #[tokio::test]
    async fn cleared_excerpt_is_regenerated_on_edit() {
        let publisher = publisher();
        let created = publisher.create_article(draft("Example Post"), None).await.unwrap();
        let edited = publisher
            .edit_article(
                created.id,
                ArticleEdit {
                    content: Some("Fresh body".into()),
                    excerpt: Some(String::new()),
                    ..ArticleEdit::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(edited.excerpt, "Fresh body");
    }

    #[tokio::test]
    async fn editing_a_missing_article_is_not_found() {
        let publisher = publisher();
        let err = publisher
            .edit_article(404, ArticleEdit::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::NotFound(404)));
    }

    #[tokio::test]
    async fn preview_matches_render() {
        let publisher = publisher();
        let raw = "# Hi\n\nhttps://example.com";
        assert_eq!(publisher.preview(raw), render(raw));
    }

    #[test]
    fn tag_names_are_trimmed_and_unique() {
        let tags = vec!["a".to_string(), " a".into(), "b".into(), "  ".into()];
        assert_eq!(tag_names(&tags), vec!["a", "b"]);
    }
}
