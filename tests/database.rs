use chrono::Utc;
use techblog::config::PublishingConfig;
use techblog::store::{ArticleStore, DatabaseStore, FsBlobStore, NewArticle, StoreError};
use techblog::{PublishError, Publisher};
use techblog_core::{ArticleDraft, ArticleEdit};

async fn store() -> DatabaseStore {
    let store = DatabaseStore::connect("sqlite::memory:").await.unwrap();
    store.create_schema().await.unwrap();
    store
}

fn new_article(slug: &str, category_id: i64, tag_ids: Vec<i64>) -> NewArticle {
    let now = Utc::now();
    NewArticle {
        title: "Title".into(),
        slug: slug.into(),
        content: "Body".into(),
        excerpt: "Body".into(),
        published: true,
        category_id,
        tag_ids,
        image: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn schema_creation_is_repeatable() {
    let store = store().await;
    store.create_schema().await.unwrap();
}

#[tokio::test]
async fn unique_slug_index_reports_conflicts() {
    let store = store().await;
    let category = store.category_get_or_create("Rust", "rust").await.unwrap();

    let first = store.insert_article(new_article("taken", category.id, vec![])).await.unwrap();
    assert!(store.slug_exists("taken", None).await.unwrap());
    assert!(!store.slug_exists("taken", Some(first.id)).await.unwrap());

    let err = store
        .insert_article(new_article("taken", category.id, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SlugConflict(ref slug) if slug == "taken"));
}

#[tokio::test]
async fn articles_round_trip_with_tags() {
    let store = store().await;
    let category = store.category_get_or_create("Rust", "rust").await.unwrap();
    let async_tag = store.tag_get_or_create("async", "async").await.unwrap();
    let tokio_tag = store.tag_get_or_create("tokio", "tokio").await.unwrap();
    assert_eq!(store.tag_get_or_create("async", "ignored").await.unwrap(), async_tag);

    let inserted = store
        .insert_article(new_article("with-tags", category.id, vec![async_tag.id, tokio_tag.id]))
        .await
        .unwrap();
    let loaded = store.article(inserted.id).await.unwrap().unwrap();
    assert_eq!(loaded.slug, "with-tags");
    assert_eq!(loaded.tag_ids, vec![async_tag.id, tokio_tag.id]);

    let mut changed = loaded.clone();
    changed.tag_ids = vec![tokio_tag.id];
    changed.title = "Changed".into();
    let updated = store.update_article(&changed).await.unwrap();
    assert_eq!(updated.title, "Changed");
    assert_eq!(store.article_by_slug("with-tags").await.unwrap().unwrap().tag_ids, vec![tokio_tag.id]);
}

#[tokio::test]
async fn updating_a_missing_article_is_reported() {
    let store = store().await;
    let category = store.category_get_or_create("Rust", "rust").await.unwrap();
    let mut ghost = new_article("ghost", category.id, vec![]).into_article(999);
    ghost.title = "Nobody".into();
    assert!(matches!(store.update_article(&ghost).await, Err(StoreError::Missing(999))));
}

#[tokio::test]
async fn category_slug_clash_with_other_name_is_a_conflict() {
    let store = store().await;
    store.category_get_or_create("C++", "c").await.unwrap();
    let err = store.category_get_or_create("C", "c").await.unwrap_err();
    assert!(matches!(err, StoreError::SlugConflict(_)));
}

#[tokio::test]
async fn publisher_over_the_database() {
    let media = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(store().await, FsBlobStore::new(media.path()), &PublishingConfig::default());

    let draft = ArticleDraft {
        title: "Example Post".into(),
        content: "Hello".into(),
        category: "C++".into(),
        tags: vec!["systems".into()],
        ..ArticleDraft::default()
    };
    let first = publisher.create_article(draft.clone(), None).await.unwrap();
    let second = publisher.create_article(draft, None).await.unwrap();
    assert_ne!(first.slug, second.slug);
    assert_eq!(first.category_id, second.category_id);

    // "C" slugifies to the slug "C++" already holds; a suffixed one is used
    let edited = publisher
        .edit_article(
            second.id,
            ArticleEdit {
                category: Some("C".into()),
                ..ArticleEdit::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_ne!(edited.category_id, first.category_id);
    assert_eq!(edited.slug, second.slug);

    let err = publisher.delete_category(first.category_id).await.unwrap_err();
    assert!(matches!(err, PublishError::Protected(ref name) if name == "C++"));
    assert!(matches!(
        publisher.delete_category(edited.category_id).await,
        Err(PublishError::Protected(_))
    ));
}
