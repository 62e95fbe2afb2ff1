use crate::models::{article, article_tag, category, tag};
use crate::store::{ArticleStore, NewArticle, StoreError};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, NotSet, PaginatorTrait, QueryFilter, Schema, Set, SqlErr, TransactionTrait,
    Unchanged,
};
use techblog_core::{Article, Category, Tag};
use tracing::{info, instrument};

/// [`ArticleStore`] over any sea-orm connection. Uniqueness comes from the
/// schema's unique indexes, not from the existence checks.
#[derive(Clone, Debug)]
pub struct DatabaseStore {
    database: DatabaseConnection,
}

impl DatabaseStore {
    pub fn new(database: DatabaseConnection) -> Self {
        DatabaseStore { database }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(Database::connect(url).await?))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.database
    }

    /// Creates the four tables if they are missing.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        let backend = self.database.get_database_backend();
        let schema = Schema::new(backend);
        let statements = [
            schema.create_table_from_entity(category::Entity),
            schema.create_table_from_entity(tag::Entity),
            schema.create_table_from_entity(article::Entity),
            schema.create_table_from_entity(article_tag::Entity),
        ];
        for mut statement in statements {
            statement.if_not_exists();
            self.database.execute(backend.build(&statement)).await?;
        }
        info!(?backend, "schema ready");
        Ok(())
    }

    async fn tag_ids(&self, article_id: i64) -> Result<Vec<i64>, StoreError> {
        let rows = article_tag::Entity::find()
            .filter(article_tag::Column::ArticleId.eq(article_id))
            .all(&self.database)
            .await?;
        let mut ids = rows.into_iter().map(|row| row.tag_id).collect::<Vec<_>>();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn to_article(&self, model: article::Model) -> Result<Article, StoreError> {
        let tag_ids = self.tag_ids(model.id).await?;
        Ok(article_from_model(model, tag_ids))
    }
}

fn article_from_model(model: article::Model, tag_ids: Vec<i64>) -> Article {
    Article {
        id: model.id,
        title: model.title,
        slug: model.slug,
        content: model.content,
        excerpt: model.excerpt,
        published: model.published,
        category_id: model.category_id,
        tag_ids,
        image: model.image,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

/// Unique violations on a slugged table are slug conflicts; everything else
/// is passed through untouched.
fn slug_conflict_or(err: DbErr, slug: &str) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::SlugConflict(slug.to_string()),
        _ => StoreError::Database(err),
    }
}

async fn link_tags<C: ConnectionTrait>(
    conn: &C,
    article_id: i64,
    tag_ids: &[i64],
) -> Result<(), DbErr> {
    if tag_ids.is_empty() {
        return Ok(());
    }
    let links = tag_ids.iter().map(|tag_id| article_tag::ActiveModel {
        article_id: Set(article_id),
        tag_id: Set(*tag_id),
    });
    article_tag::Entity::insert_many(links)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl ArticleStore for DatabaseStore {
    async fn slug_exists(&self, candidate: &str, exclude: Option<i64>) -> Result<bool, StoreError> {
        let mut query = article::Entity::find().filter(article::Column::Slug.eq(candidate));
        if let Some(id) = exclude {
            query = query.filter(article::Column::Id.ne(id));
        }
        Ok(query.count(&self.database).await? > 0)
    }

    #[instrument(skip(self, article), fields(slug = %article.slug))]
    async fn insert_article(&self, article: NewArticle) -> Result<Article, StoreError> {
        let txn = self.database.begin().await?;
        let model = article::ActiveModel {
            id: NotSet,
            title: Set(article.title.clone()),
            slug: Set(article.slug.clone()),
            content: Set(article.content.clone()),
            excerpt: Set(article.excerpt.clone()),
            published: Set(article.published),
            category_id: Set(article.category_id),
            image: Set(article.image.clone()),
            created_at: Set(article.created_at),
            updated_at: Set(article.updated_at),
        }
        .insert(&txn)
        .await
        .map_err(|why| slug_conflict_or(why, &article.slug))?;

        link_tags(&txn, model.id, &article.tag_ids).await?;
        txn.commit().await?;

        Ok(article.into_article(model.id))
    }

    async fn update_article(&self, article: &Article) -> Result<Article, StoreError> {
        let txn = self.database.begin().await?;
        let updated = article::ActiveModel {
            id: Unchanged(article.id),
            title: Set(article.title.clone()),
            slug: Set(article.slug.clone()),
            content: Set(article.content.clone()),
            excerpt: Set(article.excerpt.clone()),
            published: Set(article.published),
            category_id: Set(article.category_id),
            image: Set(article.image.clone()),
            created_at: Set(article.created_at),
            updated_at: Set(article.updated_at),
        }
        .update(&txn)
        .await
        .map_err(|why| match why {
            DbErr::RecordNotUpdated => StoreError::Missing(article.id),
            other => slug_conflict_or(other, &article.slug),
        })?;

        article_tag::Entity::delete_many()
            .filter(article_tag::Column::ArticleId.eq(article.id))
            .exec(&txn)
            .await?;
        link_tags(&txn, article.id, &article.tag_ids).await?;
        txn.commit().await?;

        let mut tag_ids = article.tag_ids.clone();
        tag_ids.sort_unstable();
        Ok(article_from_model(updated, tag_ids))
    }

    async fn article(&self, id: i64) -> Result<Option<Article>, StoreError> {
        match article::Entity::find_by_id(id).one(&self.database).await? {
            Some(model) => Ok(Some(self.to_article(model).await?)),
            None => Ok(None),
        }
    }

    async fn article_by_slug(&self, slug: &str) -> Result<Option<Article>, StoreError> {
        let found = article::Entity::find()
            .filter(article::Column::Slug.eq(slug))
            .one(&self.database)
            .await?;
        match found {
            Some(model) => Ok(Some(self.to_article(model).await?)),
            None => Ok(None),
        }
    }

    async fn category_get_or_create(&self, name: &str, slug: &str) -> Result<Category, StoreError> {
        let by_name = || {
            category::Entity::find()
                .filter(category::Column::Name.eq(name))
                .one(&self.database)
        };
        if let Some(found) = by_name().await? {
            return Ok(category_from_model(found));
        }

        let inserted = category::ActiveModel {
            id: NotSet,
            name: Set(name.to_string()),
            slug: Set(slug.to_string()),
            description: Set(String::new()),
        }
        .insert(&self.database)
        .await;

        match inserted {
            Ok(model) => Ok(category_from_model(model)),
            // lost a race on the name, or the slug belongs to another name
            Err(why) => match by_name().await? {
                Some(found) => Ok(category_from_model(found)),
                None => Err(slug_conflict_or(why, slug)),
            },
        }
    }

    async fn tag_get_or_create(&self, name: &str, slug: &str) -> Result<Tag, StoreError> {
        let by_name = || {
            tag::Entity::find()
                .filter(tag::Column::Name.eq(name))
                .one(&self.database)
        };
        if let Some(found) = by_name().await? {
            return Ok(tag_from_model(found));
        }

        let inserted = tag::ActiveModel {
            id: NotSet,
            name: Set(name.to_string()),
            slug: Set(slug.to_string()),
        }
        .insert(&self.database)
        .await;

        match inserted {
            Ok(model) => Ok(tag_from_model(model)),
            Err(why) => match by_name().await? {
                Some(found) => Ok(tag_from_model(found)),
                None => Err(slug_conflict_or(why, slug)),
            },
        }
    }

    async fn delete_category(&self, id: i64) -> Result<(), StoreError> {
        let found = category::Entity::find_by_id(id)
            .one(&self.database)
            .await?
            .ok_or(StoreError::Missing(id))?;

        let in_use = article::Entity::find()
            .filter(article::Column::CategoryId.eq(id))
            .count(&self.database)
            .await?;
        if in_use > 0 {
            return Err(StoreError::Protected(found.name));
        }

        category::Entity::delete_by_id(id)
            .exec(&self.database)
            .await
            .map_err(|why| match why.sql_err() {
                Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
                    StoreError::Protected(found.name.clone())
                }
                _ => StoreError::Database(why),
            })?;
        Ok(())
    }
}

fn category_from_model(model: category::Model) -> Category {
    Category {
        id: model.id,
        name: model.name,
        slug: model.slug,
        description: model.description,
    }
}

fn tag_from_model(model: tag::Model) -> Tag {
    Tag {
        id: model.id,
        name: model.name,
        slug: model.slug,
    }
}
