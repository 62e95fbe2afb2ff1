use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use techblog_core::{Article, Category, ImageFormat, Tag};
use thiserror::Error;

pub mod blob;
pub mod database;
pub mod memory;

pub use blob::FsBlobStore;
pub use database::DatabaseStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("slug `{0}` is already taken")]
    SlugConflict(String),
    #[error("`{0}` is still referenced")]
    Protected(String),
    #[error("no row with id {0}")]
    Missing(i64),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sea_orm::DbErr),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An article about to be inserted; the store assigns the id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewArticle {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub published: bool,
    pub category_id: i64,
    pub tag_ids: Vec<i64>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewArticle {
    pub fn into_article(self, id: i64) -> Article {
        Article {
            id,
            title: self.title,
            slug: self.slug,
            content: self.content,
            excerpt: self.excerpt,
            published: self.published,
            category_id: self.category_id,
            tag_ids: self.tag_ids,
            image: self.image,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Persistence for articles and their taxonomy.
///
/// Writes must enforce slug uniqueness themselves and report a clash as
/// [`StoreError::SlugConflict`]; `slug_exists` is only a hint.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn slug_exists(&self, candidate: &str, exclude: Option<i64>) -> Result<bool, StoreError>;

    async fn insert_article(&self, article: NewArticle) -> Result<Article, StoreError>;

    async fn update_article(&self, article: &Article) -> Result<Article, StoreError>;

    async fn article(&self, id: i64) -> Result<Option<Article>, StoreError>;

    async fn article_by_slug(&self, slug: &str) -> Result<Option<Article>, StoreError>;

    /// Returns the category called `name`, creating it with `slug` if needed.
    async fn category_get_or_create(&self, name: &str, slug: &str) -> Result<Category, StoreError>;

    async fn tag_get_or_create(&self, name: &str, slug: &str) -> Result<Tag, StoreError>;

    /// Refuses with [`StoreError::Protected`] while any article uses the category.
    async fn delete_category(&self, id: i64) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: String,
    /// False when identical bytes were already stored, possibly for another
    /// article. Only fresh blobs may be removed on rollback.
    pub fresh: bool,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores already validated image bytes under a reference path.
    async fn put(&self, format: ImageFormat, bytes: Bytes) -> Result<StoredBlob, StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError>;
}
